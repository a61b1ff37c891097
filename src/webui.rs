use crate::auth::{AuthState, PickerOutcome, SelectedCredential};
use crate::gateway::{GatewayError, ImagePayload, IndexQuote};
use crate::markdown;
use crate::parser::{AnalysisResult, MARKER_PROTOCOL_VERSION};
use crate::session::{Session, SessionView};
use anyhow::Result;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("../web/index.html");
const APP_JS: &str = include_str!("../web/app.js");

/// Chart screenshots arrive base64-encoded inside JSON.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
struct WebState {
    session: Session,
    credentials: Arc<SelectedCredential>,
}

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
    auth_required: bool,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Clone, Debug, Deserialize)]
struct SymbolRequest {
    symbol: String,
}

#[derive(Clone, Debug, Serialize)]
struct SymbolResponse {
    symbol: String,
}

#[derive(Clone, Debug, Serialize)]
struct IndicesResponse {
    quotes: Vec<IndexQuote>,
}

#[derive(Clone, Debug, Deserialize)]
struct AnalyzeRequest {
    image: String,
    mime_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnalyzeResponse {
    symbol: String,
    result: AnalysisResult,
    analysis_html: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ActivateRequest {
    api_key: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AuthResponse {
    auth: AuthState,
    picker: Option<PickerOutcome>,
}

pub async fn run_webui_server(port: u16, session: Session, credentials: Arc<SelectedCredential>) -> Result<()> {
    let auth = session.check_auth().await;
    info!("Startup credential check: {:?}", auth);

    let app = router(WebState {
        session: session.clone(),
        credentials,
    });

    let addr = format!("0.0.0.0:{}", port);
    info!("WebUI listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", err);
            }
        })
        .await?;

    session.shutdown().await;
    Ok(())
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/api/health", get(health))
        .route("/api/state", get(full_state))
        .route("/api/symbol", post(set_symbol))
        .route("/api/indices/refresh", post(refresh_indices))
        .route("/api/analyze", post(analyze))
        .route("/api/chat", post(chat))
        .route("/api/auth/check", post(auth_check))
        .route("/api/auth/activate", post(auth_activate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], APP_JS)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "marker_protocol": MARKER_PROTOCOL_VERSION }))
}

async fn full_state(State(state): State<WebState>) -> Json<SessionView> {
    Json(state.session.view(true).await)
}

async fn set_symbol(State(state): State<WebState>, Json(req): Json<SymbolRequest>) -> ApiResult<SymbolResponse> {
    match state.session.set_symbol(&req.symbol).await {
        Some(symbol) => Ok(Json(SymbolResponse { symbol })),
        None => Err(api_err(StatusCode::BAD_REQUEST, "symbol is required")),
    }
}

async fn refresh_indices(State(state): State<WebState>) -> ApiResult<IndicesResponse> {
    let quotes = state.session.refresh_indices().await.map_err(gateway_err)?;
    Ok(Json(IndicesResponse { quotes }))
}

async fn analyze(State(state): State<WebState>, Json(req): Json<AnalyzeRequest>) -> ApiResult<AnalyzeResponse> {
    let image = ImagePayload::from_data_url(&req.image, req.mime_type.as_deref())
        .map_err(|e| api_err(StatusCode::BAD_REQUEST, &format!("image could not be decoded: {e}")))?;
    if !image.mime_type.starts_with("image/") {
        return Err(api_err(StatusCode::BAD_REQUEST, "only image uploads are supported"));
    }

    let symbol = state.session.symbol().await;
    let result = state.session.analyze_image(image).await.map_err(gateway_err)?;
    let analysis_html = markdown::to_html(&result.analysis);
    Ok(Json(AnalyzeResponse { symbol, result, analysis_html }))
}

async fn chat(State(state): State<WebState>, Json(req): Json<ChatRequest>) -> ApiResult<ChatResponse> {
    let reply = state.session.send_chat(&req.message).await.map_err(gateway_err)?;
    Ok(Json(ChatResponse { reply }))
}

async fn auth_check(State(state): State<WebState>) -> Json<AuthResponse> {
    let auth = state.session.check_auth().await;
    Json(AuthResponse { auth, picker: None })
}

async fn auth_activate(
    State(state): State<WebState>,
    body: Option<Json<ActivateRequest>>,
) -> ApiResult<AuthResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(raw) = req.api_key.as_deref() {
        if !state.credentials.select(raw) {
            return Err(api_err(StatusCode::BAD_REQUEST, "api_key is empty or a placeholder"));
        }
    }

    let picker = state.session.activate().await.map_err(internal_err)?;
    let auth = state.session.auth_state().await;
    Ok(Json(AuthResponse { auth, picker: Some(picker) }))
}

fn gateway_err(err: GatewayError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        GatewayError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::AnalysisFailed(_) | GatewayError::ChatFailed(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ApiError {
            error: err.to_string(),
            auth_required: err.is_auth(),
        }),
    )
}

fn api_err(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
            auth_required: false,
        }),
    )
}

fn internal_err<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ApiError>) {
    api_err(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}
