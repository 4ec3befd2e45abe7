use std::sync::Arc;

use log::{info, warn};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::hls;
use crate::providers::{self, Extractors, MediaLocator, VideoReference};
use crate::session::{DirectFile, HlsStream, SessionCache, StreamDescriptor};

#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub reference: VideoReference,
    pub session_key: String,
    pub descriptor: Arc<StreamDescriptor>,
}

pub struct VideoResolver {
    fetcher: Arc<Fetcher>,
    extractors: Extractors,
    cache: Arc<SessionCache>,
}

impl VideoResolver {
    pub fn new(fetcher: Arc<Fetcher>, extractors: Extractors, cache: Arc<SessionCache>) -> Self {
        VideoResolver {
            fetcher,
            extractors,
            cache,
        }
    }

    pub async fn resolve(&self, embed_url: &str) -> Result<ResolvedVideo> {
        let reference = providers::classify(embed_url)?;
        let session_key = reference.session_key();
        info!(
            "Detected {} video {} ({})",
            reference.host, reference.external_id, session_key
        );

        let extractor = self
            .extractors
            .get(reference.host)
            .ok_or_else(|| Error::UnsupportedHost(embed_url.to_string()))?;
        let page_url = extractor.embed_url(&reference.external_id)?;
        let locator = extractor.extract(&self.fetcher, &page_url).await?;

        let descriptor = match locator {
            MediaLocator::Hls { manifest_url } => {
                let resolved = hls::resolve(&self.fetcher, &manifest_url).await?;
                let stream = HlsStream::new(resolved.manifest_url, resolved.segments).ok_or(
                    Error::NoSegmentsFound {
                        url: manifest_url.to_string(),
                    },
                )?;
                StreamDescriptor::hls(reference.host, stream)
            }
            MediaLocator::Direct { media_url } => {
                let file = probe_direct(&self.fetcher, media_url).await;
                StreamDescriptor::direct(reference.host, file)
            }
        };

        let descriptor = self.cache.put(&session_key, descriptor);
        Ok(ResolvedVideo {
            reference,
            session_key,
            descriptor,
        })
    }
}

// A failed HEAD still yields a playable descriptor.
async fn probe_direct(fetcher: &Fetcher, media_url: Url) -> DirectFile {
    match fetcher.fetch_head(&media_url).await {
        Ok(head) => {
            let header = |name: HeaderName| head.headers.get(name).and_then(|v| v.to_str().ok());
            let file = DirectFile {
                resolved_url: head.url.clone(),
                total_size: header(CONTENT_LENGTH)
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
                supports_ranges: header(ACCEPT_RANGES)
                    .map(|v| v.to_ascii_lowercase().contains("bytes"))
                    .unwrap_or(false),
                content_type: header(CONTENT_TYPE)
                    .filter(|v| !v.is_empty())
                    .unwrap_or("video/mp4")
                    .to_string(),
            };
            info!(
                "Direct file {} ({} bytes, ranges: {})",
                file.resolved_url, file.total_size, file.supports_ranges
            );
            file
        }
        Err(err) => {
            warn!("HEAD probe failed, streaming without size information: {err}");
            DirectFile {
                resolved_url: media_url,
                total_size: 0,
                supports_ranges: false,
                content_type: "video/mp4".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Origins, Timeouts};
    use crate::providers::Host;
    use crate::session::StreamKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(server: &MockServer) -> (VideoResolver, Arc<SessionCache>) {
        let origin = Url::parse(&server.uri()).unwrap();
        let origins = Origins {
            vidmoly: origin.clone(),
            sendvid: origin.clone(),
            sibnet: origin,
        };
        let cache = Arc::new(SessionCache::new(None));
        let fetcher = Arc::new(Fetcher::new(None, Timeouts::default()).unwrap());
        (
            VideoResolver::new(fetcher, Extractors::with_defaults(&origins), cache.clone()),
            cache,
        )
    }

    #[tokio::test]
    async fn sibnet_page_resolves_to_cached_hls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shell.php"))
            .and(query_param("videoid", "4412345"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"player.src([{src: "/v/4412345.m3u8", type: "application/x-mpegURL"}]);"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v/4412345.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXTINF:6.0,\na.ts\n#EXTINF:6.0,\nb.ts\n#EXT-X-ENDLIST\n",
            ))
            .mount(&server)
            .await;

        let (resolver, cache) = resolver(&server);
        let video = resolver
            .resolve("https://video.sibnet.ru/shell.php?videoid=4412345")
            .await
            .unwrap();

        assert_eq!(video.session_key, "sibnet_4412345");
        assert_eq!(video.descriptor.host, Host::Sibnet);
        let cached = cache.get("sibnet_4412345").unwrap();
        match &cached.kind {
            StreamKind::Hls(stream) => {
                assert_eq!(stream.segments().len(), 2);
                assert_eq!(
                    stream.segment_url(1).unwrap().as_str(),
                    format!("{}/v/b.ts", server.uri())
                );
            }
            StreamKind::Direct(_) => panic!("expected HLS"),
        }
    }

    #[tokio::test]
    async fn failed_head_probe_falls_back_to_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/embed/abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<source src="/files/abc.mp4">"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/abc.mp4"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server);
        let video = resolver.resolve("https://sendvid.com/embed/abc").await.unwrap();
        match &video.descriptor.kind {
            StreamKind::Direct(file) => {
                assert_eq!(file.total_size, 0);
                assert!(!file.supports_ranges);
                assert_eq!(file.content_type, "video/mp4");
                assert_eq!(file.resolved_url.path(), "/files/abc.mp4");
            }
            StreamKind::Hls(_) => panic!("expected direct file"),
        }
    }

    #[tokio::test]
    async fn page_without_locator_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/embed-gone.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>File was deleted</p>"))
            .mount(&server)
            .await;

        let (resolver, cache) = resolver(&server);
        let err = resolver
            .resolve("https://vidmoly.net/embed-gone.html")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocatorNotFound { host: Host::Vidmoly }));
        assert!(cache.get("vidmoly_gone").is_none());
    }

    #[tokio::test]
    async fn unreachable_page_is_locator_not_found() {
        let server = MockServer::start().await;
        let (resolver, _) = resolver(&server);
        let err = resolver
            .resolve("https://sendvid.com/embed/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocatorNotFound { host: Host::SendVid }));
    }
}
