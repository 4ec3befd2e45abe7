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
            "player-src",
            r#"(?i)player\.src\(\s*\[\s*\{[^}]*src\s*:\s*["']([^"']+\.m3u8[^"']*)["']"#,
        ),
        Rule::new(
            "media-domain",
            r#"(?i)["']((?:https?:)?//[^"']*video\.sibnet\.ru[^"']*\.m3u8[^"']*)["']"#,
        ),
    ])
});

pub struct Sibnet {
    origin: Url,
}

impl Sibnet {
    pub fn new(origin: Url) -> Self {
        Sibnet { origin }
    }
}

#[async_trait]
impl Extractor for Sibnet {
    fn host(&self) -> Host {
        Host::Sibnet
    }

    fn embed_url(&self, external_id: &str) -> Result<Url> {
        let mut url = self.origin.join("/shell.php").map_err(|_| Error::UnrecognizedFormat {
            host: Host::Sibnet,
            url: external_id.to_string(),
        })?;
        url.query_pairs_mut().append_pair("videoid", external_id);
        Ok(url)
    }

    async fn extract(&self, fetcher: &Fetcher, embed_url: &Url) -> Result<MediaLocator> {
        info!("Fetching Sibnet player page {embed_url}");
        let page = fetcher.fetch_text(embed_url).await.map_err(|err| {
            warn!("Sibnet page fetch failed: {err}");
            Error::LocatorNotFound { host: Host::Sibnet }
        })?;

        let found = RULES.first_match(&page.body).ok_or_else(|| {
            warn!("No m3u8 found on {} (tried {:?})", page.url, RULES.names());
            Error::LocatorNotFound { host: Host::Sibnet }
        })?;
        debug!("Sibnet rule '{}' matched {}", found.rule, found.value);

        let manifest_url = absolutize(&self.origin, found.value)
            .ok_or(Error::LocatorNotFound { host: Host::Sibnet })?;
        Ok(MediaLocator::Hls { manifest_url })
    }
}
