use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::fmt::Write as _;
use url::Url;

use crate::error::Error;
use crate::fetch::Fetcher;

#[derive(Debug, Clone)]
pub struct StreamVariant {
    pub label: String,
    pub bandwidth: u64,
    pub resolution: Option<(u64, u64)>,
    pub uri: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: Url,
    pub duration: f64,
}

#[derive(Debug)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub end_list: bool,
    pub segments: Vec<Segment>,
}

#[derive(Debug)]
pub enum Playlist {
    Master(Vec<StreamVariant>),
    Media(MediaPlaylist),
}

#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub manifest_url: Url,
    pub segments: Vec<Segment>,
}

// Master playlists resolve to their last listed variant.
pub async fn resolve(fetcher: &Fetcher, manifest_url: &Url) -> crate::error::Result<ResolvedPlaylist> {
    let no_segments = || Error::NoSegmentsFound {
        url: manifest_url.to_string(),
    };

    let (playlist_url, playlist) = load(fetcher, manifest_url).await.ok_or_else(no_segments)?;

    let (media_url, media) = match playlist {
        Playlist::Media(media) => {
            info!("Direct media playlist: {} segments", media.segments.len());
            (playlist_url, media)
        }
        Playlist::Master(variants) => {
            let variant = variants.last().ok_or_else(no_segments)?;
            info!(
                "Selected variant {} ({} kbps, last of {}) {}",
                variant.label,
                variant.bandwidth / 1000,
                variants.len(),
                variant.uri
            );
            debug!(
                "Variant resolutions: {:?}",
                variants.iter().map(|v| v.resolution).collect::<Vec<_>>()
            );
            match load(fetcher, &variant.uri).await {
                Some((url, Playlist::Media(media))) => (url, media),
                Some((url, Playlist::Master(_))) => {
                    warn!("Variant {url} is itself a master playlist");
                    return Err(no_segments());
                }
                None => return Err(no_segments()),
            }
        }
    };

    debug!(
        "Media playlist {media_url}: target duration {}s, end list {}",
        media.target_duration, media.end_list
    );
    if media.segments.is_empty() {
        warn!("Playlist {media_url} lists no segments");
        return Err(no_segments());
    }

    Ok(ResolvedPlaylist {
        manifest_url: media_url,
        segments: media.segments,
    })
}

async fn load(fetcher: &Fetcher, url: &Url) -> Option<(Url, Playlist)> {
    let page = match fetcher.fetch_text(url).await {
        Ok(page) => page,
        Err(err) => {
            warn!("Playlist fetch failed: {err}");
            return None;
        }
    };

    match parse_playlist(&page.url, &page.body) {
        Ok(playlist) => Some((page.url, playlist)),
        Err(err) => {
            warn!("Unreadable playlist at {}: {err:#}", page.url);
            None
        }
    }
}

pub fn parse_playlist(base_url: &Url, body: &str) -> Result<Playlist> {
    if body.lines().any(|line| line.trim().starts_with("#EXT-X-STREAM-INF:")) {
        parse_master_playlist(base_url, body).map(Playlist::Master)
    } else {
        parse_media_playlist(base_url, body).map(Playlist::Media)
    }
}

pub fn parse_master_playlist(base_url: &Url, body: &str) -> Result<Vec<StreamVariant>> {
    let mut variants = Vec::new();
    let mut pending_attrs: Option<Vec<(String, String)>> = None;

    for line in body.lines().map(str::trim) {
        if line.starts_with("#EXT-X-STREAM-INF:") {
            let attrs = parse_attribute_line(line.trim_start_matches("#EXT-X-STREAM-INF:"));
            pending_attrs = Some(attrs);
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(attrs) = pending_attrs.take() {
            let uri = resolve_url(base_url, line)
                .with_context(|| format!("Resolving stream URI from master playlist: {line}"))?;

            let mut bandwidth = 0;
            let mut resolution = None;
            let mut name = None;

            for (key, value) in attrs {
                match key.as_str() {
                    "BANDWIDTH" => bandwidth = value.parse().unwrap_or(0),
                    "AVERAGE-BANDWIDTH" if bandwidth == 0 => bandwidth = value.parse().unwrap_or(0),
                    "RESOLUTION" => resolution = parse_resolution(&value),
                    "NAME" => name = Some(value),
                    _ => {}
                }
            }

            let label = name
                .or_else(|| resolution.map(|(_, h)| format!("{h}p")))
                .unwrap_or_else(|| "unknown".into());

            variants.push(StreamVariant {
                label,
                bandwidth,
                resolution,
                uri,
            });
        }
    }

    if variants.is_empty() {
        bail!("No playable variants found in playlist");
    }

    Ok(variants)
}

pub fn parse_media_playlist(base_url: &Url, body: &str) -> Result<MediaPlaylist> {
    let mut target_duration = 0.0;
    let mut end_list = false;
    let mut segments = Vec::new();
    let mut pending_duration: Option<f64> = None;

    for line in body.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            if let Some(parsed) = parse_seconds(value) {
                target_duration = parsed;
            }
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration_part = value.split(',').next().unwrap_or_default().trim();
            pending_duration = Some(parse_seconds(duration_part).unwrap_or(0.0));
        } else if line.starts_with("#EXT-X-ENDLIST") {
            end_list = true;
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some(duration) = pending_duration.take() {
            let uri = resolve_url(base_url, line)
                .with_context(|| format!("Resolving segment URL: {line}"))?;
            segments.push(Segment { uri, duration });
        } else {
            debug!("Ignoring URI without #EXTINF: {line}");
        }
    }

    Ok(MediaPlaylist {
        target_duration,
        end_list,
        segments,
    })
}

pub fn target_duration(segments: &[Segment]) -> u64 {
    let longest = segments.iter().map(|s| s.duration).fold(0.0_f64, f64::max);
    (longest.ceil() as u64).saturating_add(1)
}

fn parse_seconds(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}

pub fn render_proxy_playlist(segments: &[Segment], segment_uri: impl Fn(usize) -> String) -> String {
    let mut out = String::with_capacity(64 + segments.len() * 48);
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", target_duration(segments));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n\n");

    for (index, segment) in segments.iter().enumerate() {
        let _ = writeln!(out, "#EXTINF:{},", format_duration(segment.duration));
        out.push_str(&segment_uri(index));
        out.push('\n');
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

fn format_duration(duration: f64) -> String {
    let text = duration.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

fn resolve_url(base: &Url, input: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(input) {
        return Ok(url);
    }

    base.join(input).context("Failed to resolve relative URL")
}

fn parse_attribute_line(value: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in value.chars() {
        match ch {
            ',' if !in_quotes => {
                if !current.is_empty() {
                    pairs.push(current.trim().to_string());
                    current.clear();
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        pairs.push(current.trim().to_string());
    }

    pairs
        .into_iter()
        .filter_map(|pair| {
            pair.split_once('=').map(|(k, v)| {
                let val = v.trim().trim_matches('"').to_string();
                (k.trim().to_string(), val)
            })
        })
        .collect()
}

fn parse_resolution(value: &str) -> Option<(u64, u64)> {
    let (w, h) = value.split_once('x')?;
    let width = w.parse().ok()?;
    let height = h.parse().ok()?;
    Some((width, height))
}
