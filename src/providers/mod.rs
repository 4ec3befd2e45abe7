use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::config::Origins;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;

pub mod rules;
pub mod sendvid;
pub mod sibnet;
pub mod vidmoly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Vidmoly,
    SendVid,
    Sibnet,
}

impl Host {
    pub fn name(&self) -> &'static str {
        match self {
            Host::Vidmoly => "vidmoly",
            Host::SendVid => "sendvid",
            Host::Sibnet => "sibnet",
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    pub host: Host,
    pub external_id: String,
}

impl VideoReference {
    pub fn new(host: Host, external_id: impl Into<String>) -> Self {
        VideoReference {
            host,
            external_id: external_id.into(),
        }
    }

    pub fn session_key(&self) -> String {
        format!("{}_{}", self.host.name(), self.external_id)
    }
}

static SENDVID_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/embed/([A-Za-z0-9]+)").expect("valid regex"));
static SENDVID_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sendvid\.[a-z]+/([A-Za-z0-9]+)(?:[/?#]|$)").expect("valid regex")
});
static VIDMOLY_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"embed-([A-Za-z0-9]+)\.html").expect("valid regex"));
static SIBNET_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"videoembed/(\d+)").expect("valid regex"));
static SIBNET_SHELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"shell\.php\?(?:[^#]*&)?videoid=(\d+)").expect("valid regex"));

// Substring order matters: sendvid, then vidmoly, then sibnet.
pub fn classify(url: &str) -> Result<VideoReference> {
    let url = url.trim();
    let lower = url.to_lowercase();

    let (host, id) = if lower.contains("sendvid") {
        let id = capture(&SENDVID_EMBED, url)
            .or_else(|| capture(&SENDVID_BARE, url).filter(|id| !id.eq_ignore_ascii_case("embed")));
        (Host::SendVid, id)
    } else if lower.contains("vidmoly") {
        (Host::Vidmoly, capture(&VIDMOLY_EMBED, url))
    } else if lower.contains("sibnet") {
        let id = capture(&SIBNET_EMBED, url).or_else(|| capture(&SIBNET_SHELL, url));
        (Host::Sibnet, id)
    } else {
        return Err(Error::UnsupportedHost(url.to_string()));
    };

    match id {
        Some(id) => Ok(VideoReference::new(host, id)),
        None => Err(Error::UnrecognizedFormat {
            host,
            url: url.to_string(),
        }),
    }
}

fn capture(re: &Regex, input: &str) -> Option<String> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocator {
    Hls { manifest_url: Url },
    Direct { media_url: Url },
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn host(&self) -> Host;

    fn embed_url(&self, external_id: &str) -> Result<Url>;

    async fn extract(&self, fetcher: &Fetcher, embed_url: &Url) -> Result<MediaLocator>;
}

pub struct Extractors {
    by_host: HashMap<Host, Box<dyn Extractor>>,
}

impl Extractors {
    pub fn new() -> Self {
        Extractors {
            by_host: HashMap::new(),
        }
    }

    pub fn with_defaults(origins: &Origins) -> Self {
        let mut extractors = Self::new();
        extractors.register(Box::new(vidmoly::Vidmoly::new(origins.vidmoly.clone())));
        extractors.register(Box::new(sendvid::SendVid::new(origins.sendvid.clone())));
        extractors.register(Box::new(sibnet::Sibnet::new(origins.sibnet.clone())));
        extractors
    }

    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.by_host.insert(extractor.host(), extractor);
    }

    pub fn get(&self, host: Host) -> Option<&dyn Extractor> {
        self.by_host.get(&host).map(|boxed| boxed.as_ref())
    }
}

impl Default for Extractors {
    fn default() -> Self {
        Self::with_defaults(&Origins::default())
    }
}

pub(crate) fn absolutize(origin: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim().replace("\\/", "/");
    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(_) => origin.join(&raw).ok(),
    }
}
