//! DocMuse server
//!
//! HTTP surface for the agent: streamed queries and rewrites, stored
//! document lookup, and direct product search. The server is started via
//! [`start_server`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderValue, Method},
    routing::get,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use docmuse_core::{
    Agent, AgentSettings, CatalogSource, ChannelRegistry, DocumentStore, LanguageModel, VectorIndex,
    build_model,
};
use docmuse_scraper::ProductScraper;
use docmuse_shared::{AppConfig, DocMuseError, Result, StreamingConfig};
use docmuse_storage::Storage;

pub mod error;
pub mod routes;
pub mod stream;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub storage: Arc<Storage>,
    /// Lookup for documents named by a request.
    pub documents: Arc<dyn DocumentStore>,
    pub scraper: Arc<ProductScraper>,
    /// Live run channels, one per streaming response.
    pub channels: Arc<ChannelRegistry>,
    pub poll_interval: Duration,
    /// Idle time after which a stream sends a keep-alive comment.
    pub keep_alive: Duration,
    /// Set while a background catalog refresh is running.
    pub refreshing: Arc<AtomicBool>,
}

impl AppState {
    /// Wire the agent to its collaborators.
    pub fn new(
        storage: Arc<Storage>,
        scraper: Arc<ProductScraper>,
        model: Arc<dyn LanguageModel>,
        config: &AppConfig,
    ) -> Self {
        let index: Arc<dyn VectorIndex> = storage.clone();
        let source = Arc::new(CatalogSource::new(scraper.clone(), storage.clone()));
        let agent = Agent::new(index, model, AgentSettings::from(config)).with_source(source);

        Self {
            agent: Arc::new(agent),
            documents: storage.clone(),
            storage,
            scraper,
            channels: Arc::new(ChannelRegistry::new()),
            poll_interval: Duration::from_millis(config.streaming.poll_interval_ms.max(1)),
            keep_alive: Duration::from_secs(config.streaming.keep_alive_secs.max(1)),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open storage, pick the model backend and build the scraper from config.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let db_path = config.storage.resolved_db_path()?;
        let storage = Arc::new(Storage::open(&db_path).await?);
        let model = build_model(&config.openrouter)?;
        let scraper = Arc::new(ProductScraper::new(&config.scraper)?);
        info!(db = %db_path.display(), demo = model.is_demo(), "server state ready");
        Ok(Self::new(storage, scraper, model, config))
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(routes::api_router())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Periodically drop channels whose stream was never drained.
pub fn spawn_reaper(
    channels: Arc<ChannelRegistry>,
    config: &StreamingConfig,
) -> tokio::task::JoinHandle<()> {
    let max_age = Duration::from_secs(config.channel_max_age_secs);
    let every = Duration::from_secs(config.reap_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = channels.reap(max_age);
            if reaped > 0 {
                info!(reaped, live = channels.len(), "reaped abandoned channels");
            }
        }
    })
}

/// Start the server and block until Ctrl-C.
pub async fn start_server(config: &AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| DocMuseError::config(format!("invalid listen address: {e}")))?;

    let state = AppState::from_config(config).await?;
    let reaper = spawn_reaper(state.channels.clone(), &config.streaming);
    let app = build_router(state, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DocMuseError::Network(format!("failed to bind {addr}: {e}")))?;
    info!("DocMuse server listening on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await;
    reaper.abort();

    served.map_err(|e| DocMuseError::Network(format!("server error: {e}")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use docmuse_core::DemoModel;
    use futures::StreamExt;
    use docmuse_shared::{KnowledgeBase, ScraperConfig};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn temp_storage() -> Arc<Storage> {
        let db = std::env::temp_dir().join(format!("docmuse_server_{}.db", uuid::Uuid::now_v7()));
        Arc::new(Storage::open(&db).await.unwrap())
    }

    async fn state_with(model: Arc<dyn LanguageModel>, scraper: ScraperConfig) -> AppState {
        let scraper = Arc::new(ProductScraper::new(&scraper).unwrap().allow_localhost());
        let mut config = AppConfig::default();
        config.agent.max_attempts = 1;
        AppState::new(temp_storage().await, scraper, model, &config)
    }

    /// Storefront that refuses connections, so augmentation fails fast.
    fn offline_storefront() -> ScraperConfig {
        ScraperConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            max_products: 5,
        }
    }

    async fn demo_state() -> AppState {
        state_with(Arc::new(DemoModel), offline_storefront()).await
    }

    fn app(state: &AppState) -> Router {
        build_router(state.clone(), &["*".to_string()])
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn seed_resume(storage: &Storage) -> String {
        let doc = storage
            .upsert_document(
                None,
                KnowledgeBase::Resumes,
                "Jane Doe CV",
                "Rust engineer with tokio experience",
                &json!({}),
            )
            .await
            .unwrap();
        storage
            .insert_chunk(
                "Rust engineer with tokio experience",
                &doc.id,
                KnowledgeBase::Resumes,
                &json!({"title": "Jane Doe CV"}),
            )
            .await
            .unwrap();
        doc.id
    }

    #[tokio::test]
    async fn health_reports_version() {
        let state = demo_state().await;
        let response = app(&state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unknown_knowledge_base_is_rejected_synchronously() {
        let state = demo_state().await;
        let response = app(&state)
            .oneshot(post_json("/query", json!({"kb": "horoscopes", "prompt": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(state.channels.is_empty());
    }

    #[tokio::test]
    async fn query_streams_statuses_then_result() {
        let state = demo_state().await;
        seed_resume(&state.storage).await;

        let response = app(&state)
            .oneshot(post_json(
                "/query",
                json!({"kb": "resumes", "prompt": "rust experience", "stream_tokens": true}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert!(response.headers().contains_key(stream::RUN_ID_HEADER));

        let text = body_text(response).await;
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(
            frames[0],
            "event: status\ndata: Retrieving relevant information..."
        );
        assert!(frames.iter().any(|f| f.starts_with("event: token\n")));

        let last = frames.last().unwrap();
        assert!(last.starts_with("event: result\ndata: "));
        let payload: Value =
            serde_json::from_str(last.trim_start_matches("event: result\ndata: ")).unwrap();
        assert_eq!(payload["status"], "complete");
        assert_eq!(payload["mode"], "demo");
        assert_eq!(payload["sources"], json!([{"title": "Jane Doe CV"}]));

        assert!(state.channels.is_empty());
    }

    #[tokio::test]
    async fn rewrite_requires_existing_supplement() {
        let state = demo_state().await;
        let response = app(&state)
            .oneshot(post_json(
                "/query/supplement/rewrite",
                json!({"doc_id": "missing", "tone": "playful"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rewrite_result_names_document() {
        let state = demo_state().await;
        let doc = state
            .storage
            .upsert_document(
                Some("prod-1"),
                KnowledgeBase::Supplements,
                "Magnesium",
                "Title: Magnesium\nDescription: Calm support",
                &json!({}),
            )
            .await
            .unwrap();
        state
            .storage
            .insert_chunk(
                &doc.content,
                &doc.id,
                KnowledgeBase::Supplements,
                &json!({"title": "Magnesium"}),
            )
            .await
            .unwrap();

        let response = app(&state)
            .oneshot(post_json(
                "/query/supplement/rewrite",
                json!({"doc_id": "prod-1", "tone": "playful"}),
            ))
            .await
            .unwrap();
        let text = body_text(response).await;
        let last = text.split("\n\n").filter(|f| !f.is_empty()).last().unwrap();
        let payload: Value =
            serde_json::from_str(last.trim_start_matches("event: result\ndata: ")).unwrap();
        assert_eq!(payload["original_doc_id"], "prod-1");
        assert!(payload["rewritten"].as_str().unwrap().starts_with("[demo]"));
    }

    #[tokio::test]
    async fn document_lookup() {
        let state = demo_state().await;
        let doc_id = seed_resume(&state.storage).await;

        let found = app(&state)
            .oneshot(get(&format!("/doc/resumes/{doc_id}")))
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(found).await).unwrap();
        assert_eq!(body["title"], "Jane Doe CV");

        let wrong_kb = app(&state)
            .oneshot(get(&format!("/doc/recipes/{doc_id}")))
            .await
            .unwrap();
        assert_eq!(wrong_kb.status(), StatusCode::NOT_FOUND);

        let bad_kb = app(&state).oneshot(get("/doc/nope/x")).await.unwrap();
        assert_eq!(bad_kb.status(), StatusCode::BAD_REQUEST);

        let listed = app(&state).oneshot(get("/doc/resumes")).await.unwrap();
        let list: Value = serde_json::from_str(&body_text(listed).await).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert!(list[0].get("content").is_none());
    }

    #[tokio::test]
    async fn product_search_stores_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="product-grid"><div class="product-card">
                     <a href="/products/zinc"><span class="product-card__title">Zinc</span></a>
                     <span class="price">$20.00</span>
                   </div></div>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/products/zinc"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scraper = ScraperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_products: 5,
        };
        let state = state_with(Arc::new(DemoModel), scraper).await;

        let response = app(&state)
            .oneshot(post_json("/scrape/search", json!({"query": "zinc"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["products"][0]["title"], "Zinc");
        assert_eq!(
            state.storage.count_chunks(KnowledgeBase::Supplements).await.unwrap(),
            1
        );
    }

    struct HangingModel;

    #[async_trait]
    impl LanguageModel for HangingModel {
        async fn invoke(&self, _system: &str, _user: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn client_disconnect_cancels_run() {
        let state = state_with(Arc::new(HangingModel), offline_storefront()).await;
        seed_resume(&state.storage).await;

        let response = app(&state)
            .oneshot(post_json("/query", json!({"kb": "resumes", "prompt": "rust"})))
            .await
            .unwrap();
        assert_eq!(state.channels.len(), 1);

        drop(response);
        assert!(state.channels.is_empty());
    }

    struct PanickingModel;

    #[async_trait]
    impl LanguageModel for PanickingModel {
        async fn invoke(&self, _system: &str, _user: &str) -> Result<String> {
            panic!("model backend crashed");
        }
    }

    #[tokio::test]
    async fn crashed_run_still_ends_with_error_frame() {
        let state = state_with(Arc::new(PanickingModel), offline_storefront()).await;
        seed_resume(&state.storage).await;

        let response = app(&state)
            .oneshot(post_json("/query", json!({"kb": "resumes", "prompt": "rust"})))
            .await
            .unwrap();
        let text = body_text(response).await;

        let last = text.split("\n\n").filter(|f| !f.is_empty()).last().unwrap();
        assert!(last.starts_with("event: error\ndata: "));
        let payload: Value =
            serde_json::from_str(last.trim_start_matches("event: error\ndata: ")).unwrap();
        assert_eq!(payload["stage"], "internal");
        assert_eq!(payload["retryable"], false);
        assert!(state.channels.is_empty());
    }

    #[tokio::test]
    async fn quiet_stream_sends_keep_alive() {
        let mut state = state_with(Arc::new(HangingModel), offline_storefront()).await;
        state.keep_alive = Duration::from_millis(100);
        seed_resume(&state.storage).await;

        let response = app(&state)
            .oneshot(post_json("/query", json!({"kb": "resumes", "prompt": "rust"})))
            .await
            .unwrap();
        let mut frames = response.into_body().into_data_stream();

        let keep_alive = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(chunk) = frames.next().await {
                if chunk.unwrap() == docmuse_core::sse::KEEP_ALIVE.as_bytes() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(keep_alive);
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_bad_request() {
        let state = demo_state().await;
        let response = app(&state)
            .oneshot(post_json("/query", json!({"kb": "resumes"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(body["error"].as_str().unwrap().contains("prompt"));
    }

    #[tokio::test]
    async fn ingested_document_is_queryable() {
        let state = demo_state().await;
        let response = app(&state)
            .oneshot(post_json(
                "/ingest",
                json!({"kb": "recipes", "title": "Focaccia", "content": "Proof the dough overnight"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["kb"], "recipes");
        assert_eq!(body["chunks"], 1);
        let id = body["id"].as_str().unwrap().to_string();

        let hits = state
            .storage
            .query_chunks("dough", KnowledgeBase::Recipes, 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, id);

        let again = app(&state)
            .oneshot(post_json(
                "/ingest",
                json!({"kb": "recipes", "id": id, "content": "Proof the dough for two days"}),
            ))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::OK);
        assert_eq!(state.storage.count_chunks(KnowledgeBase::Recipes).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ingest_rejects_unknown_kb_and_empty_content() {
        let state = demo_state().await;
        for body in [
            json!({"kb": "horoscopes", "content": "text"}),
            json!({"kb": "recipes", "content": "   "}),
        ] {
            let response = app(&state).oneshot(post_json("/ingest", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn product_refresh_runs_in_background() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/all"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="product-grid"><div class="product-card">
                     <a href="/products/omega"><span class="product-card__title">Omega-3</span></a>
                   </div></div>"#,
            ))
            .mount(&server)
            .await;

        let scraper = ScraperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_products: 5,
        };
        let state = state_with(Arc::new(DemoModel), scraper).await;

        let response = app(&state)
            .oneshot(post_json("/scrape/refresh_products", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "started");

        let mut stored = 0;
        for _ in 0..50 {
            stored = state.storage.count_chunks(KnowledgeBase::Supplements).await.unwrap();
            if stored == 1 && !state.refreshing.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(stored, 1);
        assert!(!state.refreshing.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn overlapping_refresh_is_not_started_twice() {
        let state = demo_state().await;
        state.refreshing.store(true, std::sync::atomic::Ordering::SeqCst);

        let response = app(&state)
            .oneshot(post_json("/scrape/refresh_products", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn reaper_removes_stale_channels() {
        let channels = Arc::new(ChannelRegistry::new());
        let (sender, _events) = channels.open("stale");
        let config = StreamingConfig {
            poll_interval_ms: 50,
            channel_max_age_secs: 0,
            reap_interval_secs: 1,
            ..Default::default()
        };

        let reaper = spawn_reaper(channels.clone(), &config);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        reaper.abort();

        assert!(channels.is_empty());
        assert!(sender.is_closed());
    }
}
