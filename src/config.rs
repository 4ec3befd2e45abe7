use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use url::Url;

/// Desktop browser identity; the supported hosts reject default client agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Resolves Vidmoly, SendVid and Sibnet embeds into proxied HLS or MP4 streams"
)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "EMBED_PROXY_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// JSON file holding saved playback positions
    #[arg(long, env = "EMBED_PROXY_PROGRESS_FILE", value_name = "FILE")]
    pub progress_file: Option<PathBuf>,

    /// Override the default user agent
    #[arg(long, env = "EMBED_PROXY_USER_AGENT", value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Timeout in seconds for embed pages, playlists and HEAD probes
    #[arg(long, env = "EMBED_PROXY_PAGE_TIMEOUT", default_value_t = 10)]
    pub page_timeout: u64,

    /// Timeout in seconds for a single HLS segment
    #[arg(long, env = "EMBED_PROXY_SEGMENT_TIMEOUT", default_value_t = 15)]
    pub segment_timeout: u64,

    /// Seconds to wait for the first byte of a direct file stream
    #[arg(long, env = "EMBED_PROXY_STREAM_TIMEOUT", default_value_t = 30)]
    pub stream_timeout: u64,

    /// Seconds a resolved video stays cached without being accessed (0 keeps it forever)
    #[arg(long, env = "EMBED_PROXY_SESSION_TTL", default_value_t = 6 * 60 * 60)]
    pub session_ttl: u64,

    /// Segments fetched in parallel while building a full HLS download
    #[arg(long, env = "EMBED_PROXY_DOWNLOAD_CONCURRENCY", default_value_t = 1)]
    pub download_concurrency: usize,

    /// Never remux HLS downloads with ffmpeg, even when it is installed
    #[arg(long, env = "EMBED_PROXY_NO_REMUX", action = ArgAction::SetTrue)]
    pub no_remux: bool,

    #[arg(long, env = "EMBED_PROXY_VIDMOLY_ORIGIN", default_value = "https://vidmoly.net")]
    pub vidmoly_origin: Url,

    #[arg(long, env = "EMBED_PROXY_SENDVID_ORIGIN", default_value = "https://sendvid.com")]
    pub sendvid_origin: Url,

    #[arg(long, env = "EMBED_PROXY_SIBNET_ORIGIN", default_value = "https://video.sibnet.ru")]
    pub sibnet_origin: Url,
}

impl Config {
    pub fn progress_path(&self) -> PathBuf {
        self.progress_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("embed-proxy"))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("video_progress.json")
        })
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            page: Duration::from_secs(self.page_timeout),
            segment: Duration::from_secs(self.segment_timeout),
            stream: Duration::from_secs(self.stream_timeout),
        }
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl > 0).then(|| Duration::from_secs(self.session_ttl))
    }

    pub fn origins(&self) -> Origins {
        Origins {
            vidmoly: self.vidmoly_origin.clone(),
            sendvid: self.sendvid_origin.clone(),
            sibnet: self.sibnet_origin.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub page: Duration,
    pub segment: Duration,
    pub stream: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            page: Duration::from_secs(10),
            segment: Duration::from_secs(15),
            stream: Duration::from_secs(30),
        }
    }
}

/// Where canonical embed pages are fetched from, per host.
#[derive(Debug, Clone)]
pub struct Origins {
    pub vidmoly: Url,
    pub sendvid: Url,
    pub sibnet: Url,
}

impl Default for Origins {
    fn default() -> Self {
        Origins {
            vidmoly: Url::parse("https://vidmoly.net").expect("static origin"),
            sendvid: Url::parse("https://sendvid.com").expect("static origin"),
            sibnet: Url::parse("https://video.sibnet.ru").expect("static origin"),
        }
    }
}
