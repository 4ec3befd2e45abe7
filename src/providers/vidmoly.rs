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
            "sources-array",
            r#"(?i)sources\s*:\s*\[\s*\{\s*file\s*:\s*["']([^"']+\.m3u8[^"']*)["']"#,
        ),
        Rule::new(
            "file-assignment",
            r#"(?i)file\s*:\s*["']([^"']+\.m3u8[^"']*)["']"#,
        ),
    ])
});

pub struct Vidmoly {
    origin: Url,
}

impl Vidmoly {
    pub fn new(origin: Url) -> Self {
        Vidmoly { origin }
    }
}

#[async_trait]
impl Extractor for Vidmoly {
    fn host(&self) -> Host {
        Host::Vidmoly
    }

    fn embed_url(&self, external_id: &str) -> Result<Url> {
        self.origin
            .join(&format!("/embed-{external_id}.html"))
            .map_err(|_| Error::UnrecognizedFormat {
                host: Host::Vidmoly,
                url: external_id.to_string(),
            })
    }

    async fn extract(&self, fetcher: &Fetcher, embed_url: &Url) -> Result<MediaLocator> {
        info!("Fetching Vidmoly embed page {embed_url}");
        let page = fetcher.fetch_text(embed_url).await.map_err(|err| {
            warn!("Vidmoly page fetch failed: {err}");
            Error::LocatorNotFound { host: Host::Vidmoly }
        })?;

        let found = RULES.first_match(&page.body).ok_or_else(|| {
            warn!("No m3u8 found on {} (tried {:?})", page.url, RULES.names());
            Error::LocatorNotFound { host: Host::Vidmoly }
        })?;
        debug!("Vidmoly rule '{}' matched {}", found.rule, found.value);

        let manifest_url = absolutize(&page.url, found.value)
            .ok_or(Error::LocatorNotFound { host: Host::Vidmoly })?;
        Ok(MediaLocator::Hls { manifest_url })
    }
}
