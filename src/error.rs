use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::providers::Host;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported source: {0}")]
    UnsupportedHost(String),

    #[error("unrecognized {host} url: {url}")]
    UnrecognizedFormat { host: Host, url: String },

    #[error("no playable media found on the {host} page")]
    LocatorNotFound { host: Host },

    #[error("no segments found in playlist {url}")]
    NoSegmentsFound { url: String },

    #[error("video {0} is not loaded, resolve it again")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("video {key} is not a {expected} stream")]
    WrongStreamKind { key: String, expected: &'static str },

    #[error("segment {index} does not exist for video {key}")]
    SegmentOutOfRange { key: String, index: usize },

    #[error("upstream answered {status} for {url}")]
    Upstream { url: String, status: u16 },

    #[error("download failed: {0}")]
    Download(String),

    #[error("progress storage failed: {0}")]
    Storage(String),
}

impl Error {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::UnsupportedHost(_) | Error::UnrecognizedFormat { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidRequest(_) | Error::WrongStreamKind { .. } => StatusCode::BAD_REQUEST,
            Error::LocatorNotFound { .. } => StatusCode::NOT_FOUND,
            Error::NotFound(_) | Error::SegmentOutOfRange { .. } => StatusCode::NOT_FOUND,
            Error::NoSegmentsFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Download(_) | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedHost(_) => "unsupported_host",
            Error::UnrecognizedFormat { .. } => "unrecognized_format",
            Error::LocatorNotFound { .. } => "locator_not_found",
            Error::NoSegmentsFound { .. } => "no_segments_found",
            Error::NotFound(_) => "not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::WrongStreamKind { .. } => "wrong_stream_kind",
            Error::SegmentOutOfRange { .. } => "segment_out_of_range",
            Error::Upstream { .. } => "upstream_error",
            Error::Download(_) => "download_error",
            Error::Storage(_) => "storage_error",
        }
    }

    pub fn suggests_iframe(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedHost(_) | Error::UnrecognizedFormat { .. }
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            error!("{} ({})", self, status);
        }

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        if self.suggests_iframe() {
            body["use_iframe"] = json!(true);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_errors_are_bad_requests_with_iframe_hint() {
        let err = Error::UnsupportedHost("https://example.com/v/1".into());
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        assert!(err.suggests_iframe());

        let err = Error::UnrecognizedFormat {
            host: Host::Vidmoly,
            url: "https://vidmoly.net/".into(),
        };
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        assert!(err.suggests_iframe());
    }

    #[test]
    fn lookup_failures_are_not_found() {
        assert_eq!(
            Error::LocatorNotFound { host: Host::SendVid }.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NotFound("sendvid_abc".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert!(!Error::NotFound("sendvid_abc".into()).suggests_iframe());
    }

    #[test]
    fn upstream_rejection_is_bad_gateway() {
        let err = Error::Upstream {
            url: "https://cdn.example/seg.ts".into(),
            status: 403,
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
