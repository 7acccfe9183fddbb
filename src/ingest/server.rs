use super::api::{health, not_found, post_log, tail_log, version, IngestState};
use super::auth::{require_api_key, ApiKey};
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the HTTP surface. Only `/log` is behind the API key.
pub fn router(state: IngestState, api_key: ApiKey, max_body_bytes: usize) -> Router {
    let log_routes = get(tail_log).post(post_log).fallback(not_found);

    let protected = Router::new()
        .route("/log", log_routes.clone())
        .route("/log/", log_routes)
        .route_layer(middleware::from_fn_with_state(api_key, require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .merge(protected)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "Ingest server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::ingest::auth::API_KEY_HEADER;
    use crate::storage::{LogStore, LogTarget};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const KEY: &str = "test-key";
    const LIMIT: usize = 1024 * 1024;

    fn setup() -> (TempDir, Arc<LogStore>, IngestState) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let state = IngestState {
            store: store.clone(),
            broadcaster: Broadcaster::new(64),
            version: Arc::from("1.2.3"),
        };
        (dir, store, state)
    }

    fn post(body: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/log");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_post_appends_and_answers_ok() {
        let (_dir, store, state) = setup();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let response = app.oneshot(post(r#"["a","b"]"#, Some(KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let content = std::fs::read_to_string(store.active_path().unwrap()).unwrap();
        assert_eq!(content, "a\nb\n");
    }

    #[tokio::test]
    async fn test_bad_key_is_not_found_and_writes_nothing() {
        let (_dir, store, state) = setup();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        for key in [Some("wrong"), Some(""), None] {
            let response = app.clone().oneshot(post(r#"["x"]"#, key)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let content = std::fs::read_to_string(store.active_path().unwrap()).unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_batch_is_client_error() {
        let (_dir, store, state) = setup();
        let broadcaster = state.broadcaster.clone();
        let mut sub = broadcaster.subscribe();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let response = app.oneshot(post(r#"{"nope": 1}"#, Some(KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let content = std::fs::read_to_string(store.active_path().unwrap()).unwrap();
        assert!(content.is_empty());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error_and_not_published() {
        let (_dir, store, state) = setup();
        let broadcaster = state.broadcaster.clone();
        let mut sub = broadcaster.subscribe();
        store.close().await.unwrap();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let response = app.oneshot(post(r#"["x"]"#, Some(KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.contains("closed"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_labeled_batch_is_published_with_source() {
        let (_dir, store, state) = setup();
        let mut sub = state.broadcaster.subscribe();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let response = app
            .oneshot(post(r#"{"source":"worker","logs":["one"]}"#, Some(KEY)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = sub.recv().await.unwrap();
        assert_eq!(record.source.as_deref(), Some("worker"));
        assert_eq!(record.line, "one");

        let content = std::fs::read_to_string(store.active_path().unwrap()).unwrap();
        assert_eq!(content, "one\n");
    }

    #[tokio::test]
    async fn test_health_and_version_need_no_key() {
        let (_dir, _store, state) = setup();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let response = app
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, "1.2.3");
    }

    #[tokio::test]
    async fn test_other_methods_and_routes_are_not_found() {
        let (_dir, _store, state) = setup();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let request = Request::builder()
            .method("DELETE")
            .uri("/log")
            .header(API_KEY_HEADER, KEY)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trailing_slash_is_accepted() {
        let (_dir, store, state) = setup();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let request = Request::builder()
            .method("POST")
            .uri("/log/")
            .header(API_KEY_HEADER, KEY)
            .body(Body::from(r#"["slash"]"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let content = std::fs::read_to_string(store.active_path().unwrap()).unwrap();
        assert_eq!(content, "slash\n");
    }

    #[tokio::test]
    async fn test_tail_streams_published_lines() {
        let (_dir, _store, state) = setup();
        let broadcaster = state.broadcaster.clone();
        let app = router(state, ApiKey::new(KEY), LIMIT);

        let request = Request::get("/log?format=json")
            .header(API_KEY_HEADER, KEY)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/x-ndjson"
        );
        assert_eq!(broadcaster.subscriber_count(), 1);

        let response_post = app.oneshot(post(r#"["a","b"]"#, Some(KEY))).await.unwrap();
        assert_eq!(response_post.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let second = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"{\"source\":null,\"line\":\"a\"}\n");
        assert_eq!(&second[..], b"{\"source\":null,\"line\":\"b\"}\n");

        // Dropping the body is a disconnect.
        drop(body);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
