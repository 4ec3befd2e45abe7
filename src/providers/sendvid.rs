use std::sync::LazyLock;

use async_trait::async_trait;
use log::{debug, info, warn};
use url::Url;

use super::rules::{Rule, RuleSet};
use super::{Extractor, Host, MediaLocator, absolutize};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;

static RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    RuleSet::new(vec![
        Rule::new(
            "source-tag",
            r#"(?i)<source[^>]*src=["']([^"']+\.mp4[^"']*)["']"#,
        ),
        Rule::new(
            "file-assignment",
            r#"(?i)file\s*:\s*["']([^"']+\.(?:mp4|webm)[^"']*)["']"#,
        ),
        Rule::new(
            "player-setup",
            r#"(?is)player\.setup\s*\(\s*\{.*?["']?file["']?\s*:\s*["']([^"']+)["']"#,
        ),
        Rule::new(
            "absolute-url",
            r#"(?i)(https?://[^\s"'<>]+\.(?:mp4|webm)[^\s"'<>]*)"#,
        ),
    ])
});

pub struct SendVid {
    origin: Url,
}

impl SendVid {
    pub fn new(origin: Url) -> Self {
        SendVid { origin }
    }
}

#[async_trait]
impl Extractor for SendVid {
    fn host(&self) -> Host {
        Host::SendVid
    }

    fn embed_url(&self, external_id: &str) -> Result<Url> {
        self.origin
            .join(&format!("/embed/{external_id}"))
            .map_err(|_| Error::UnrecognizedFormat {
                host: Host::SendVid,
                url: external_id.to_string(),
            })
    }

    async fn extract(&self, fetcher: &Fetcher, embed_url: &Url) -> Result<MediaLocator> {
        info!("Fetching SendVid embed page {embed_url}");
        let page = fetcher.fetch_text(embed_url).await.map_err(|err| {
            warn!("SendVid page fetch failed: {err}");
            Error::LocatorNotFound { host: Host::SendVid }
        })?;

        let found = RULES.first_match(&page.body).ok_or_else(|| {
            warn!("No video file found on {} (tried {:?})", page.url, RULES.names());
            Error::LocatorNotFound { host: Host::SendVid }
        })?;
        debug!("SendVid rule '{}' matched {}", found.rule, found.value);

        let media_url = absolutize(&self.origin, found.value)
            .ok_or(Error::LocatorNotFound { host: Host::SendVid })?;
        Ok(MediaLocator::Direct { media_url })
    }
}
