use crate::display::{DisplayConfigError, DisplayConfiguration, IconTag, PRESET_RESOLUTIONS};
use crate::metrics::Metrics;
use crate::orchestrator::{Operation, OperationHandle, Orchestrator, Outcome};
use crate::state::{ActivityRecord, Severity, State as ServiceState, SystemState};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on how long `GET /api/state?after=<revision>` holds a request.
const LONG_POLL_LIMIT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub orchestrator: Orchestrator,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiActivity {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub severity: Severity,
    pub timestamp_unix: i64,
    pub timestamp: String,
}

impl From<&ActivityRecord> for ApiActivity {
    fn from(value: &ActivityRecord) -> Self {
        Self {
            id: value.id,
            title: value.title.clone(),
            description: value.description.clone(),
            icon: value.icon.clone(),
            severity: value.severity,
            timestamp_unix: value.timestamp_unix,
            timestamp: format_unix(value.timestamp_unix),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub revision: u64,
    #[serde(flatten)]
    pub system: SystemState,
    pub recent_activity: Vec<ApiActivity>,
}

impl From<&ServiceState> for ApiState {
    fn from(value: &ServiceState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            revision: value.revision,
            system: value.system.clone(),
            recent_activity: value.activity.iter().map(ApiActivity::from).collect(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiIconOption {
    pub tag: IconTag,
    pub label: &'static str,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiOptions {
    pub resolutions: Vec<&'static str>,
    pub icons: Vec<ApiIconOption>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Accepted {
    pub operation: Operation,
    pub accepted: bool,
}

impl Accepted {
    fn response(operation: Operation) -> Response {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                operation,
                accepted: true,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Finished {
    pub operation: Operation,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StateQuery {
    /// Hold the request until the revision moves past this value.
    pub after: Option<u64>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ActionQuery {
    /// Respond with the outcome once the terminal entry is recorded.
    #[serde(default)]
    pub wait: bool,
}

/// `202` right away, or `200` with the outcome when the caller asked to wait.
/// A waiting client that disconnects detaches the operation; it still runs.
async fn respond(handle: OperationHandle, query: ActionQuery) -> Response {
    let operation = handle.operation();
    if !query.wait {
        return Accepted::response(operation);
    }
    let outcome = handle.wait().await;
    (StatusCode::OK, Json(Finished { operation, outcome })).into_response()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConfigureRequest {
    pub resolution: String,
    pub icon: String,
    #[serde(default)]
    pub custom_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidConfiguration(#[from] DisplayConfigError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub fn build_router(metrics: Arc<Metrics>, orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/activity", get(activity_handler))
        .route("/api/options", get(options_handler))
        .route("/api/actions/info", post(info_handler))
        .route("/api/actions/auto", post(auto_handler))
        .route("/api/actions/diagnostics", post(diagnostics_handler))
        .route("/api/actions/configure", post(configure_handler))
        .route("/api/actions/reset", post(reset_handler))
        .route("/api/actions/manual-setup", post(manual_setup_handler))
        .with_state(HttpAppState {
            metrics,
            orchestrator,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    let snapshot = state.orchestrator.snapshot().await;
    state.metrics.update_from_state(&snapshot);
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<StateQuery>,
) -> impl IntoResponse {
    let snapshot = match query.after {
        Some(revision) => {
            state
                .orchestrator
                .snapshot_after(revision, LONG_POLL_LIMIT)
                .await
        }
        None => state.orchestrator.snapshot().await,
    };
    Json(ApiState::from(&snapshot))
}

async fn activity_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.snapshot().await;
    let entries: Vec<ApiActivity> = snapshot.activity.iter().map(ApiActivity::from).collect();
    Json(entries)
}

async fn options_handler() -> impl IntoResponse {
    Json(ApiOptions {
        resolutions: PRESET_RESOLUTIONS.to_vec(),
        icons: IconTag::ALL
            .into_iter()
            .map(|tag| ApiIconOption {
                tag,
                label: tag.label(),
            })
            .collect(),
    })
}

async fn info_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ActionQuery>,
) -> Response {
    respond(state.orchestrator.load_system_info().await, query).await
}

async fn auto_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ActionQuery>,
) -> Response {
    respond(state.orchestrator.auto_configure().await, query).await
}

async fn diagnostics_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ActionQuery>,
) -> Response {
    respond(state.orchestrator.run_diagnostics().await, query).await
}

async fn configure_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ActionQuery>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Response, ApiError> {
    let cfg =
        DisplayConfiguration::parse(&req.resolution, &req.icon, req.custom_name.as_deref())?;
    let handle = state.orchestrator.apply_configuration(&cfg).await;
    Ok(respond(handle, query).await)
}

async fn reset_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ActionQuery>,
) -> Response {
    respond(state.orchestrator.reset_configuration().await, query).await
}

async fn manual_setup_handler(State(state): State<HttpAppState>) -> Response {
    state.orchestrator.manual_setup().await;
    Accepted::response(Operation::ManualSetup)
}

fn format_unix(ts: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::FakeRunner;
    use crate::script::ScriptMode;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_with(runner: Arc<FakeRunner>) -> (Router, Orchestrator) {
        let metrics = Metrics::new().expect("metrics init");
        let orchestrator = Orchestrator::new(runner, metrics.clone(), 0);
        (build_router(metrics, orchestrator.clone()), orchestrator)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn api_state_returns_initial_fields() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .oneshot(Request::builder().uri("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["system_status"], "Checking...");
        assert_eq!(json["monitor_name"], "Unknown");
        assert_eq!(json["revision"], 0);
        assert_eq!(json["recent_activity"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn configure_action_is_accepted_and_applied() {
        let runner = Arc::new(FakeRunner::ok(""));
        let (app, orchestrator) = app_with(runner.clone());
        let mut changes = orchestrator.subscribe();

        let response = app
            .oneshot(post_json(
                "/api/actions/configure",
                r#"{"resolution":"3840x2160","icon":"imac","custom_name":"Office Monitor"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["operation"], "apply_configuration");

        while orchestrator.snapshot().await.system.hidpi_status != "Configured" {
            changes.changed().await.unwrap();
        }
        let calls = runner.calls();
        assert_eq!(calls[0].mode, ScriptMode::Configure);
        assert_eq!(calls[0].args, vec!["3840x2160", "imac", "Office Monitor"]);
    }

    #[tokio::test]
    async fn configure_rejects_unknown_icon() {
        let runner = Arc::new(FakeRunner::ok(""));
        let (app, orchestrator) = app_with(runner.clone());

        let response = app
            .oneshot(post_json(
                "/api/actions/configure",
                r#"{"resolution":"1920x1080","icon":"thinkpad"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("thinkpad"));
        assert!(runner.calls().is_empty());
        assert!(orchestrator.snapshot().await.activity.is_empty());
    }

    #[tokio::test]
    async fn configure_rejects_bad_resolution() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .oneshot(post_json(
                "/api/actions/configure",
                r#"{"resolution":"huge","icon":"lg"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn configure_rejects_zero_padded_resolution() {
        let runner = Arc::new(FakeRunner::ok(""));
        let (app, _) = app_with(runner.clone());

        let response = app
            .oneshot(post_json(
                "/api/actions/configure",
                r#"{"resolution":"03840x2160","icon":"lg"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("03840x2160"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn action_with_wait_reports_outcome() {
        let (app, orchestrator) = app_with(Arc::new(FakeRunner::failing()));

        let response = app
            .oneshot(post_json("/api/actions/reset?wait=true", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["operation"], "reset_configuration");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(orchestrator.snapshot().await.activity.len(), 2);
    }

    #[tokio::test]
    async fn state_long_poll_returns_after_next_change() {
        let (app, orchestrator) = app_with(Arc::new(FakeRunner::ok("")));

        let request = tokio::spawn(
            app.oneshot(
                Request::builder()
                    .uri("/api/state?after=0")
                    .body(Body::empty())
                    .unwrap(),
            ),
        );
        orchestrator.manual_setup().await;

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["revision"], 1);
        assert_eq!(json["recent_activity"][0]["title"], "Manual Setup");
    }

    #[tokio::test(start_paused = true)]
    async fn state_long_poll_times_out_unchanged() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/state?after=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["revision"], 0);
    }

    #[tokio::test]
    async fn manual_setup_shows_in_activity() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .clone()
            .oneshot(post_json("/api/actions/manual-setup", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::builder().uri("/api/activity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json[0]["title"], "Manual Setup");
        assert_eq!(json[0]["severity"], "warning");
        assert!(json[0]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn options_lists_presets_and_icons() {
        let (app, _) = app_with(Arc::new(FakeRunner::ok("")));

        let response = app
            .oneshot(Request::builder().uri("/api/options").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["resolutions"].as_array().unwrap().len(), 8);
        assert_eq!(json["icons"][4]["tag"], "proxdr");
        assert_eq!(json["icons"][4]["label"], "Pro Display XDR");
    }

    #[tokio::test]
    async fn metrics_reports_operations() {
        let (app, orchestrator) = app_with(Arc::new(FakeRunner::ok("")));
        orchestrator.run_diagnostics().await.wait().await;

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("hidpid_operations_started_total{operation=\"run_diagnostics\"} 1"));
        assert!(text.contains("hidpid_activity_entries 2"));
    }
}
