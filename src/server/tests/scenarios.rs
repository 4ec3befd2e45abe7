use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{app, body_bytes, body_json, get, post_json};

const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
high/index.m3u8
";

const MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg0.ts
#EXTINF:10.0,
seg1.ts
#EXTINF:10.0,
seg2.ts
#EXT-X-ENDLIST
";

async fn mount_vidmoly(server: &MockServer) {
    let page = format!(r#"player.setup({{sources:[{{file:"{}/master.m3u8"}}]}});"#, server.uri());
    Mock::given(method("GET"))
        .and(path("/embed-abc123.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/high/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MEDIA))
        .mount(server)
        .await;
    for (index, body) in ["AAA", "BBB", "CCC"].into_iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/high/seg{index}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
}

async fn mount_sendvid(server: &MockServer, id: &str, body: Vec<u8>, ranges: bool) {
    let page = format!(r#"<video><source src="/video/{id}.mp4" type="video/mp4"></video>"#);
    Mock::given(method("GET"))
        .and(path(format!("/embed/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;

    let mut head = ResponseTemplate::new(200)
        .insert_header("content-type", "video/mp4")
        .set_body_bytes(body.clone());
    if ranges {
        head = head.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(format!("/video/{id}.mp4")))
        .respond_with(head)
        .mount(server)
        .await;

    if ranges {
        Mock::given(method("GET"))
            .and(path(format!("/video/{id}.mp4")))
            .and(header("range", "bytes=0-1023"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes 0-1023/{}", body.len()).as_str(),
                    )
                    .set_body_bytes(body[..1024].to_vec()),
            )
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("/video/{id}.mp4")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn vidmoly_master_resolves_to_last_variant_manifest() {
    let server = MockServer::start().await;
    mount_vidmoly(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://vidmoly.net/embed-abc123.html" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["success"], true);
    assert_eq!(info["playerType"], "vidmoly");
    assert_eq!(info["videoKey"], "vidmoly_abc123");
    assert_eq!(info["segments"], 3);
    assert_eq!(info["duration"], 30.0);

    let response = app
        .clone()
        .oneshot(get("/api/video/stream/vidmoly_abc123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers()["cache-control"], "no-cache");
    let manifest = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(manifest.contains("#EXT-X-TARGETDURATION:11\n"));
    assert_eq!(manifest.matches("#EXTINF:10.0,").count(), 3);
    assert!(manifest.contains("/api/video/segment/vidmoly_abc123/2\n"));
    assert!(manifest.trim_end().ends_with("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn segments_are_proxied_by_index() {
    let server = MockServer::start().await;
    mount_vidmoly(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    app.clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://vidmoly.to/embed-abc123.html" }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/video/segment/vidmoly_abc123/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp2t");
    assert_eq!(
        response.headers()["cache-control"],
        "public, max-age=3600"
    );
    assert_eq!(body_bytes(response).await, b"BBB");

    let response = app
        .clone()
        .oneshot(get("/api/video/segment/vidmoly_abc123/3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "segment_out_of_range");
}

#[tokio::test]
async fn hls_download_concatenates_segments_as_ts() {
    let server = MockServer::start().await;
    mount_vidmoly(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    app.clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://vidmoly.net/embed-abc123.html" }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get("/api/video/download/vidmoly_abc123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp2t");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"video_vidmoly_abc123.ts\""
    );
    assert_eq!(body_bytes(response).await, b"AAABBBCCC");
}

#[tokio::test]
async fn sendvid_range_request_is_forwarded() {
    let server = MockServer::start().await;
    let file: Vec<u8> = (0..5_242_880u32).map(|i| (i % 251) as u8).collect();
    mount_sendvid(&server, "xyz789", file.clone(), true).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://sendvid.com/embed/xyz789" }),
        ))
        .await
        .unwrap();
    let info = body_json(response).await;
    assert_eq!(info["success"], true);
    assert_eq!(info["playerType"], "sendvid");
    assert_eq!(info["videoKey"], "sendvid_xyz789");
    assert_eq!(info["size"], 5_242_880);
    assert_eq!(info["supportsRange"], true);
    assert!(info.get("segments").is_none());

    let request = axum::http::Request::get("/api/video/stream/sendvid_xyz789")
        .header("range", "bytes=0-1023")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()["content-range"],
        "bytes 0-1023/5242880"
    );
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(response.headers()["content-length"], "1024");
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 1024);
    assert_eq!(body, file[..1024]);
}

#[tokio::test]
async fn unsatisfiable_range_is_relayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/r416.mp4"))
        .and(header("range", "bytes=999999-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */2048"))
        .mount(&server)
        .await;
    mount_sendvid(&server, "r416", vec![7u8; 2048], true).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    app.clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://sendvid.com/embed/r416" }),
        ))
        .await
        .unwrap();

    let request = axum::http::Request::get("/api/video/stream/sendvid_r416")
        .header("range", "bytes=999999-")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()["content-range"], "bytes */2048");
}

#[tokio::test]
async fn range_is_dropped_when_upstream_lacks_support() {
    let server = MockServer::start().await;
    mount_sendvid(&server, "norange1", b"whole file".to_vec(), false).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    app.clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://sendvid.com/embed/norange1" }),
        ))
        .await
        .unwrap();

    let request = axum::http::Request::get("/api/video/stream/sendvid_norange1")
        .header("range", "bytes=0-3")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "10");
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(body_bytes(response).await, b"whole file");
}

#[tokio::test]
async fn direct_download_is_an_mp4_attachment() {
    let server = MockServer::start().await;
    mount_sendvid(&server, "dl42", b"mp4 bytes".to_vec(), false).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("progress.json"));

    app.clone()
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://sendvid.com/dl42" }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/video/download/sendvid_dl42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"video_sendvid_dl42.mp4\""
    );
    assert_eq!(body_bytes(response).await, b"mp4 bytes");

    let response = app
        .oneshot(get("/api/video/segment/sendvid_dl42/0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "wrong_stream_kind");
}

#[tokio::test]
async fn unknown_host_asks_for_iframe_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let app = app("http://127.0.0.1:9", &dir.path().join("progress.json"));

    let response = app
        .oneshot(post_json(
            "/api/video/info",
            json!({ "url": "https://example.com/watch/42" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["use_iframe"], true);
    assert_eq!(body["code"], "unsupported_host");
}

#[tokio::test]
async fn missing_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app("http://127.0.0.1:9", &dir.path().join("progress.json"));

    for body in [json!({}), json!({ "url": "  " })] {
        let response = app
            .clone()
            .oneshot(post_json("/api/video/info", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "invalid_request");
    }
}

#[tokio::test]
async fn unknown_key_must_be_resolved_again() {
    let dir = tempfile::tempdir().unwrap();
    let app = app("http://127.0.0.1:9", &dir.path().join("progress.json"));

    for uri in [
        "/api/video/stream/vidmoly_missing",
        "/api/video/segment/vidmoly_missing/0",
        "/api/video/download/vidmoly_missing",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "not_found");
    }
}

#[tokio::test]
async fn health_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let app = app("http://127.0.0.1:9", &dir.path().join("progress.json"));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}
