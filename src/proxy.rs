use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{debug, info, warn};

use crate::download::{Remuxer, concat_segments};
use crate::error::{Error, Result};
use crate::fetch::{FetchError, Fetcher};
use crate::hls;
use crate::session::{DirectFile, HlsStream, SessionCache, StreamDescriptor, StreamKind};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const TS_CONTENT_TYPE: &str = "video/mp2t";
pub const SEGMENT_ROUTE: &str = "/api/video/segment";

pub struct Proxy {
    fetcher: Arc<Fetcher>,
    cache: Arc<SessionCache>,
    remuxer: Option<Remuxer>,
    download_concurrency: usize,
}

impl Proxy {
    pub fn new(
        fetcher: Arc<Fetcher>,
        cache: Arc<SessionCache>,
        remuxer: Option<Remuxer>,
        download_concurrency: usize,
    ) -> Self {
        Proxy {
            fetcher,
            cache,
            remuxer,
            download_concurrency,
        }
    }

    fn descriptor(&self, key: &str) -> Result<Arc<StreamDescriptor>> {
        self.cache
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub async fn stream(&self, key: &str, range: Option<&str>) -> Result<Response> {
        let descriptor = self.descriptor(key)?;
        match &descriptor.kind {
            StreamKind::Hls(stream) => Ok((
                [
                    (CONTENT_TYPE, HLS_CONTENT_TYPE),
                    (CACHE_CONTROL, "no-cache"),
                ],
                render_manifest(key, stream),
            )
                .into_response()),
            StreamKind::Direct(file) => self.direct(key, file, range).await,
        }
    }

    pub async fn segment(&self, key: &str, index: usize) -> Result<Response> {
        let descriptor = self.descriptor(key)?;
        let StreamKind::Hls(stream) = &descriptor.kind else {
            return Err(Error::WrongStreamKind {
                key: key.to_string(),
                expected: "hls",
            });
        };
        let url = stream
            .segment_url(index)
            .ok_or_else(|| Error::SegmentOutOfRange {
                key: key.to_string(),
                index,
            })?;

        debug!("Proxying segment {index} of {key}");
        let upstream = self
            .fetcher
            .open_segment(url)
            .await
            .map_err(upstream_error)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TS_CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
        if let Some(length) = upstream.headers().get(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, length.clone());
        }

        Ok((
            StatusCode::OK,
            headers,
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response())
    }

    // Range is only forwarded to upstreams that advertised support.
    async fn direct(&self, key: &str, file: &DirectFile, range: Option<&str>) -> Result<Response> {
        let forwarded = range.filter(|_| file.supports_ranges);
        if range.is_some() && forwarded.is_none() {
            debug!("Upstream of {key} ignores ranges, sending the whole file");
        }

        let upstream = self
            .fetcher
            .open(&file.resolved_url, forwarded, self.fetcher.timeouts().stream)
            .await
            .map_err(upstream_error)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, content_type_value(&file.content_type));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let status = if forwarded.is_some() {
            for name in [CONTENT_RANGE, CONTENT_LENGTH] {
                if let Some(value) = upstream.headers().get(&name) {
                    headers.insert(name, value.clone());
                }
            }
            upstream.status()
        } else {
            if let Some(length) = known_length(file, upstream.headers()) {
                headers.insert(CONTENT_LENGTH, length);
            }
            StatusCode::OK
        };

        Ok((status, headers, Body::from_stream(upstream.bytes_stream())).into_response())
    }

    pub async fn download(&self, key: &str) -> Result<Response> {
        let descriptor = self.descriptor(key)?;
        match &descriptor.kind {
            StreamKind::Direct(file) => {
                info!("Downloading {key} from {}", file.resolved_url);
                let upstream = self
                    .fetcher
                    .open(&file.resolved_url, None, self.fetcher.timeouts().stream)
                    .await
                    .map_err(upstream_error)?;

                let mut headers = attachment_headers(key, file.extension())?;
                headers.insert(CONTENT_TYPE, content_type_value(&file.content_type));
                if let Some(length) = known_length(file, upstream.headers()) {
                    headers.insert(CONTENT_LENGTH, length);
                }
                Ok((headers, Body::from_stream(upstream.bytes_stream())).into_response())
            }
            StreamKind::Hls(stream) => {
                info!("Downloading {key}: {} segments", stream.segments().len());
                if let Some(remuxer) = &self.remuxer {
                    let file = remuxer.remux(&self.fetcher, key, stream.segments()).await?;
                    let mut headers = attachment_headers(key, "mp4")?;
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(file.size));
                    return Ok((headers, Body::from_stream(file.body)).into_response());
                }

                let mut headers = attachment_headers(key, "ts")?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(TS_CONTENT_TYPE));
                let body = concat_segments(
                    self.fetcher.clone(),
                    key.to_string(),
                    stream.segments().to_vec(),
                    self.download_concurrency,
                );
                Ok((headers, Body::from_stream(body)).into_response())
            }
        }
    }
}

pub fn render_manifest(key: &str, stream: &HlsStream) -> String {
    hls::render_proxy_playlist(stream.segments(), |index| {
        format!("{SEGMENT_ROUTE}/{key}/{index}")
    })
}

fn upstream_error(err: FetchError) -> Error {
    warn!("Upstream fetch failed: {err}");
    let status = match &err {
        FetchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT.as_u16(),
        other => other.status().unwrap_or(StatusCode::BAD_GATEWAY.as_u16()),
    };
    let (FetchError::Timeout { url, .. }
    | FetchError::Status { url, .. }
    | FetchError::Transport { url, .. }) = err;
    Error::Upstream { url, status }
}

fn content_type_value(content_type: &str) -> HeaderValue {
    HeaderValue::from_str(content_type).unwrap_or_else(|_| HeaderValue::from_static("video/mp4"))
}

fn known_length(file: &DirectFile, upstream: &HeaderMap) -> Option<HeaderValue> {
    if file.total_size > 0 {
        Some(HeaderValue::from(file.total_size))
    } else {
        upstream.get(CONTENT_LENGTH).cloned()
    }
}

fn attachment_headers(key: &str, extension: &str) -> Result<HeaderMap> {
    let disposition = format!("attachment; filename=\"video_{key}.{extension}\"");
    let value = HeaderValue::from_str(&disposition)
        .map_err(|_| Error::InvalidRequest(format!("invalid video key {key}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_DISPOSITION, value);
    Ok(headers)
}
