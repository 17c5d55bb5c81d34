// src/api/mod.rs — Local HTTP API over the monitor and the portal session

pub mod auth;
pub mod handlers;
pub mod types;
pub mod webhooks;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::infra::config::{ApiConfig, DeviceSuffixes};
use crate::monitor::MonitorStatus;
use crate::portal::SessionManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SessionManager>,
    /// Latest monitor outcome; the monitor is the only writer.
    pub status: watch::Receiver<MonitorStatus>,
    pub devices: DeviceSuffixes,
    pub token: Option<String>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/devices", get(handlers::list_devices))
        .route("/energy-flow", get(handlers::energy_flow))
        .route("/set-config-signals", post(handlers::set_config_signals))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn start_server<F>(config: &ApiConfig, state: ApiState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.bind, config.port);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding API server to {addr}"))?;
    tracing::info!("API server listening on http://{addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::PortalCredentials;
    use crate::monitor::Health;
    use crate::portal::EnergyFlowSnapshot;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    fn unreachable_session() -> Arc<SessionManager> {
        // Nothing listens on port 9.
        Arc::new(
            SessionManager::new(PortalCredentials {
                host: "http://127.0.0.1:9".into(),
                username: "user".into(),
                password: "pass".into(),
                request_timeout_secs: 2,
            })
            .unwrap(),
        )
    }

    fn test_state(token: Option<&str>) -> (ApiState, watch::Sender<MonitorStatus>) {
        let (tx, rx) = watch::channel(MonitorStatus::default());
        let state = ApiState {
            session: unreachable_session(),
            status: rx,
            devices: DeviceSuffixes::default(),
            token: token.map(str::to_string),
        };
        (state, tx)
    }

    async fn get(app: Router, uri: &str, bearer: Option<&str>) -> Response {
        let mut req = Request::builder().uri(uri);
        if let Some(t) = bearer {
            req = req.header("authorization", format!("Bearer {t}"));
        }
        app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index_lists_routes() {
        let (state, _tx) = test_state(None);
        let resp = get(build_router(state), "/", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let urls: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["url"].as_str().unwrap())
            .collect();
        assert!(urls.contains(&"/energy-flow"));
        assert!(urls.contains(&"/set-config-signals"));
    }

    #[tokio::test]
    async fn test_health_follows_monitor() {
        let (state, tx) = test_state(Some("secret"));
        let app = build_router(state);

        let resp = get(app.clone(), "/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "starting");

        tx.send_replace(MonitorStatus {
            health: Health::Degraded {
                reason: "fetch failed after renewal".into(),
                since: chrono::Utc::now(),
            },
            consecutive_failures: 3,
            ..MonitorStatus::default()
        });
        let resp = get(app.clone(), "/health", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["consecutiveFailures"], 3);
        assert_eq!(body["reason"], "fetch failed after renewal");
    }

    #[tokio::test]
    async fn test_energy_flow_before_and_after_first_snapshot() {
        let (state, tx) = test_state(None);
        let app = build_router(state);

        let resp = get(app.clone(), "/energy-flow", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        tx.send_replace(MonitorStatus {
            health: Health::Healthy,
            snapshot: Some(EnergyFlowSnapshot {
                solar_generation_kw: 3.2,
                ..EnergyFlowSnapshot::default()
            }),
            consecutive_failures: 0,
            updated_at: Some(chrono::Utc::now()),
        });
        let resp = get(app, "/energy-flow", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["solarGenerationKw"], 3.2);
    }

    #[tokio::test]
    async fn test_devices_unavailable_before_login() {
        let (state, _tx) = test_state(None);
        let resp = get(build_router(state), "/devices", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let (state, _tx) = test_state(Some("secret"));
        let app = build_router(state);

        assert_eq!(get(app.clone(), "/", None).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            get(app.clone(), "/energy-flow", Some("wrong")).await.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(get(app, "/", Some("secret")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_server_fails_when_port_taken() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ApiConfig {
            bind: "127.0.0.1".into(),
            port: taken.local_addr().unwrap().port(),
            ..ApiConfig::default()
        };
        let (state, _tx) = test_state(None);

        let err = start_server(&config, state, std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("binding API server"), "{err:#}");
    }

    #[tokio::test]
    async fn test_set_config_signals_portal_error_is_bad_gateway() {
        let (state, _tx) = test_state(None);
        let req = Request::builder()
            .method("POST")
            .uri("/set-config-signals")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":"230190032","value":"1"}"#))
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(json_body(resp).await["error"].is_string());
    }
}
