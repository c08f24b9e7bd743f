//! HLS file server
//!
//! | Route                        | Response                                   |
//! |------------------------------|--------------------------------------------|
//! | `GET /streams`               | JSON array of live stream ids              |
//! | `GET /stream/:id/manifest`   | the stream's playlist                      |
//! | `GET /stream/:id/:file`      | `stream.m3u8` or a `.ts` segment           |
//!
//! Files are only served for registered streams, and only playlist and
//! segment files; everything else is a 404.

use std::io;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use tower_http::cors::CorsLayer;

use crate::registry::{RegistryError, StreamId, StreamRegistry};
use crate::transcoder::session::MANIFEST_FILE;

const PLAYLIST_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_TYPE: &str = "video/MP2T";

/// Build the file server router
pub fn router(streams: Arc<StreamRegistry>) -> Router {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/stream/:id/:file", get(stream_file))
        .layer(CorsLayer::permissive())
        .with_state(streams)
}

async fn list_streams(State(streams): State<Arc<StreamRegistry>>) -> Json<Vec<StreamId>> {
    Json(streams.live_streams().await)
}

async fn stream_file(
    State(streams): State<Arc<StreamRegistry>>,
    Path((id, file)): Path<(String, String)>,
) -> Response {
    let id = StreamId::new(id);

    let (path, content_type) = if file == "manifest" || file == MANIFEST_FILE {
        (streams.manifest_path(&id).await, PLAYLIST_TYPE)
    } else if file.ends_with(".ts") {
        (streams.file_path(&id, &file).await, SEGMENT_TYPE)
    } else {
        return not_found();
    };

    let path = match path {
        Ok(path) => path,
        Err(RegistryError::InvalidSegmentName(_)) => {
            return (StatusCode::BAD_REQUEST, "invalid file name").into_response()
        }
        Err(_) => return not_found(),
    };

    match tokio::fs::read(&path).await {
        Ok(data) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Bytes::from(data),
        )
            .into_response(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => not_found(),
        Err(e) => {
            tracing::warn!(stream = %id, path = %path.display(), error = %e, "Failed to read stream file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;
    use crate::peer::PeerId;
    use crate::transcoder::{ExportSession, ExportState, Layout, Strategy};

    async fn registry_with_stream(
        root: &std::path::Path,
    ) -> (Arc<StreamRegistry>, watch::Sender<ExportState>, PathBuf) {
        let id = StreamId::new("abc");
        let dir = root.join(id.directory_name());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stream.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.join("segment_000.ts"), [0x47u8, 0x40, 0x00]).unwrap();
        std::fs::write(dir.join("leg-0.sdp"), "v=0\n").unwrap();

        let (tx, rx) = watch::channel(ExportState::Active);
        let session = ExportSession::new(
            id,
            dir.clone(),
            Layout::SideBySideCombined,
            Strategy::Combined,
            vec![PeerId::new(1), PeerId::new(2)],
            rx,
        );
        let registry = Arc::new(StreamRegistry::new());
        registry.register(session).await.unwrap();
        (registry, tx, dir)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Bytes) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, body)
    }

    #[tokio::test]
    async fn test_list_streams() {
        let root = tempfile::tempdir().unwrap();
        let (registry, tx, _) = registry_with_stream(root.path()).await;

        let (status, _, body) = get(router(Arc::clone(&registry)), "/streams").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], br#"["abc"]"#);

        tx.send(ExportState::Failed {
            reason: "gone".into(),
        })
        .unwrap();
        let (_, _, body) = get(router(registry), "/streams").await;
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn test_manifest_routes() {
        let root = tempfile::tempdir().unwrap();
        let (registry, _tx, _) = registry_with_stream(root.path()).await;

        for uri in ["/stream/abc/manifest", "/stream/abc/stream.m3u8"] {
            let (status, content_type, body) = get(router(Arc::clone(&registry)), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type.as_deref(), Some(PLAYLIST_TYPE));
            assert_eq!(&body[..], b"#EXTM3U\n");
        }
    }

    #[tokio::test]
    async fn test_segment_route() {
        let root = tempfile::tempdir().unwrap();
        let (registry, _tx, _) = registry_with_stream(root.path()).await;

        let (status, content_type, body) =
            get(router(registry), "/stream/abc/segment_000.ts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(SEGMENT_TYPE));
        assert_eq!(&body[..], &[0x47, 0x40, 0x00]);
    }

    #[tokio::test]
    async fn test_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let (registry, _tx, dir) = registry_with_stream(root.path()).await;
        std::fs::remove_file(dir.join("stream.m3u8")).unwrap();

        for uri in [
            "/stream/abc/manifest",
            "/stream/abc/segment_999.ts",
            "/stream/abc/leg-0.sdp",
            "/stream/nope/manifest",
        ] {
            let (status, _, _) = get(router(Arc::clone(&registry)), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let root = tempfile::tempdir().unwrap();
        let (registry, _tx, _) = registry_with_stream(root.path()).await;

        let (status, _, _) = get(router(registry), "/stream/abc/..%2Fsecret.ts").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
