//! Assembles the request pipeline.
//!
//! Outermost first: tracing span, access record, panic guard, then routing.
//! `/meta` and the legacy `/meta` fallback answer without looking at the body.
//! Everything else passes body normalization first, then the lifecycle hooks,
//! the scheduler trigger, login/logout, static assets and the admin-gated
//! business routes.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    access::{record_access, AccessSink, TracingSink},
    auth::{self, require_admin, AdminGateway},
    body::{normalize_body, BodyParser, JsonOrFormParser},
    config::{ConfigError, ConfigProvider, ExtensionConfig},
    error::panic_response,
    handlers, hooks,
    meta::{self, Metadata},
    process_logs::{process_logs, LogProcessing, LogShipper},
    store::{StateStore, StorageProvider},
    AppState,
};

/// Collaborators and locations that are not part of the extension config.
#[derive(Clone)]
pub struct BuildOptions {
    /// Where `data.json` lives when no storage provider is given.
    pub data_dir: PathBuf,
    /// Pre-built dashboard assets served under `/app`.
    pub static_dir: PathBuf,
    pub shipper: Option<Arc<dyn LogShipper>>,
    pub access_sink: Arc<dyn AccessSink>,
    pub body_parser: Arc<dyn BodyParser>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            static_dir: PathBuf::from("dist"),
            shipper: None,
            access_sink: Arc::new(TracingSink),
            body_parser: Arc::new(JsonOrFormParser),
        }
    }
}

/// Build the application with default options.
pub fn build(
    config: Arc<dyn ConfigProvider>,
    storage: Option<Arc<dyn StorageProvider>>,
) -> Result<Router, ConfigError> {
    build_with(config, storage, BuildOptions::default())
}

/// Resolve the extension config and assemble an independent router.
///
/// Every call gets its own store handle; nothing is shared between routers.
pub fn build_with(
    config: Arc<dyn ConfigProvider>,
    storage: Option<Arc<dyn StorageProvider>>,
    options: BuildOptions,
) -> Result<Router, ConfigError> {
    let config = ExtensionConfig::resolve(config)?;
    let store = StateStore::select(storage, &options.data_dir);
    let metadata = Metadata::embedded();
    let gateway = Arc::new(AdminGateway::new(&config));

    info!(
        backend = store.backend_name(),
        base_url = %config.base_url,
        static_dir = %options.static_dir.display(),
        "assembling request pipeline"
    );

    let state = AppState {
        store: store.clone(),
        shipper: options.shipper.clone(),
        metadata: metadata.clone(),
    };

    let business = handlers::router(state)
        .route_layer(middleware::from_fn_with_state(gateway.clone(), require_admin));

    let gated = Router::new()
        .merge(auth::routes(gateway))
        .nest_service("/app", ServeDir::new(&options.static_dir))
        .merge(business)
        .layer(middleware::from_fn_with_state(
            LogProcessing {
                store: store.clone(),
                shipper: options.shipper,
            },
            process_logs,
        ));

    let with_body = Router::new()
        .nest("/.extensions", hooks::router(store))
        .merge(gated)
        .layer(middleware::from_fn_with_state(
            options.body_parser,
            normalize_body,
        ));

    Ok(Router::new()
        .merge(meta::router(metadata.clone()))
        .merge(with_body)
        .merge(meta::fallback_router(metadata))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(
            options.access_sink,
            record_access,
        ))
        .layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        body::Body,
        extract::Request,
        http::{header, StatusCode},
    };
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::tests::{valid_token, BASE_URL, SECRET},
        body::{BodyError, SandboxContext},
        config::{AUTH0_DOMAIN, AUTH0_RTA, EXTENSION_SECRET, WT_URL},
        meta::METADATA_JSON,
        process_logs::tests::ScriptedShipper,
        store::InMemoryProvider,
    };

    fn provider() -> Arc<dyn ConfigProvider> {
        let vars: HashMap<String, String> = [
            (AUTH0_DOMAIN, "example.auth0.com"),
            (AUTH0_RTA, "https://rta.example.com"),
            (EXTENSION_SECRET, SECRET),
            (WT_URL, BASE_URL),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        Arc::new(vars)
    }

    /// Delegates to the default parser and counts calls.
    #[derive(Default)]
    struct CountingParser {
        calls: AtomicUsize,
    }

    impl BodyParser for CountingParser {
        fn parse(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<Value, BodyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JsonOrFormParser.parse(content_type, bytes)
        }
    }

    fn trigger(body: Value) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn missing_config_is_fatal() {
        let empty: Arc<dyn ConfigProvider> = Arc::new(HashMap::<String, String>::new());
        assert!(matches!(
            build(empty, None),
            Err(ConfigError::Missing(EXTENSION_SECRET))
        ));
    }

    #[tokio::test]
    async fn meta_is_public() {
        let app = build(provider(), Some(Arc::new(InMemoryProvider::new()))).unwrap();
        let resp = app
            .oneshot(Request::builder().uri("/meta").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], METADATA_JSON.as_bytes());
    }

    #[tokio::test]
    async fn meta_ignores_unparseable_bodies() {
        let app = build(provider(), Some(Arc::new(InMemoryProvider::new()))).unwrap();
        for uri in ["/meta", "/meta/"] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(uri)
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from("{not json"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&bytes[..], METADATA_JSON.as_bytes());
        }
    }

    #[tokio::test]
    async fn oversized_body_is_413_through_the_pipeline() {
        let app = build(provider(), Some(Arc::new(InMemoryProvider::new()))).unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("x".repeat(200 * 1024)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn business_routes_need_a_session() {
        let app = build(provider(), Some(Arc::new(InMemoryProvider::new()))).unwrap();
        for uri in ["/", "/api/report", "/api/checkpoint"] {
            let resp = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/checkpoint")
                    .header(header::AUTHORIZATION, format!("Bearer {}", valid_token()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_run_never_reaches_shipper() {
        let shipper = Arc::new(ScriptedShipper::default());
        let app = build_with(
            provider(),
            Some(Arc::new(InMemoryProvider::new())),
            BuildOptions {
                shipper: Some(shipper.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(shipper.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scheduler_trigger_runs_without_session() {
        let shipper = Arc::new(ScriptedShipper {
            next_checkpoint: Some("555".into()),
            ..Default::default()
        });
        let storage = Arc::new(InMemoryProvider::new());
        let app = build_with(
            provider(),
            Some(storage.clone()),
            BuildOptions {
                shipper: Some(shipper.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        let resp = app
            .oneshot(trigger(json!({"schedule": "*/5 * * * *", "state": "active"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(shipper.seen.lock().unwrap().len(), 1);
        assert_eq!(
            storage.snapshot().await.unwrap()["checkpointId"],
            json!("555")
        );
    }

    #[tokio::test]
    async fn sandboxed_body_skips_parser() {
        let parser = Arc::new(CountingParser::default());
        let shipper = Arc::new(ScriptedShipper::default());
        let app = build_with(
            provider(),
            Some(Arc::new(InMemoryProvider::new())),
            BuildOptions {
                shipper: Some(shipper.clone()),
                body_parser: parser.clone(),
                ..Default::default()
            },
        )
        .unwrap();

        let mut request = trigger(json!({"ignored": true}));
        request.extensions_mut().insert(SandboxContext {
            body: Some(json!({"schedule": "*/5 * * * *", "state": "active"})),
        });
        let resp = app.oneshot(request).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
        assert_eq!(shipper.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hooks_are_public_and_uninstall_clears_state() {
        let dir = tempdir().unwrap();
        let app = build_with(
            provider(),
            None,
            BuildOptions {
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
        )
        .unwrap();
        let store = StateStore::local_file(dir.path().join(crate::store::STATE_FILE));
        store
            .read_modify_write(|mut d| {
                d.set_checkpoint_id(Some("1".into()));
                d
            })
            .await
            .unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/.extensions/on-uninstall")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(store.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_404() {
        let app = build(provider(), Some(Arc::new(InMemoryProvider::new()))).unwrap();
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(Request::builder().uri("/meta/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
