//! HTTP control surface.
//!
//! Routes:
//!
//! ```text
//! GET  /health                        liveness + uptime
//! GET  /api/status                    channel status + pipeline counters
//! POST /api/channel/{platform}/start  start a channel for an authorized account
//! POST /api/test/simulate             start a credential-less douyin channel
//! GET  /oauth/{platform}              302 to the consent page (?format=json for JSON)
//! GET  /oauth/{platform}/whitelist    same, with the whitelist scope
//! GET  /oauth/callback                code exchange, stores the credential
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Form, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::channels::status_tracker::ChannelStatusInfo;
use crate::channels::{Channel, ChannelManager, Platform};
use crate::credentials::CredentialStore;
use crate::error::{ChannelError, OAuthError, ServerError};
use crate::oauth::{DEFAULT_SCOPE, DouyinOAuth, WHITELIST_SCOPE};
use crate::pipeline::{Pipeline, PipelineStats};

/// Room used by `/api/test/simulate` when no default room is configured.
const SIMULATED_ROOM_ID: &str = "123456789";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChannelManager>,
    pub pipeline: Arc<Pipeline>,
    pub credentials: CredentialStore,
    pub oauth: Arc<DouyinOAuth>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        manager: Arc<ChannelManager>,
        pipeline: Arc<Pipeline>,
        credentials: CredentialStore,
        oauth: Arc<DouyinOAuth>,
    ) -> Self {
        Self {
            manager,
            pipeline,
            credentials,
            oauth,
            started_at: Instant::now(),
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({"success": false, "error": message.into()})),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    channels: BTreeMap<String, String>,
    details: Vec<ChannelStatusInfo>,
    pipeline: PipelineStats,
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartChannelForm {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub video_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Build the router with all routes and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/channel/{platform}/start", post(start_channel))
        .route("/api/test/simulate", post(simulate))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/{platform}", get(oauth_authorize))
        .route("/oauth/{platform}/whitelist", get(oauth_whitelist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        channels: state.manager.get_status().await,
        details: state.manager.tracker().get_all_statuses().await,
        pipeline: state.pipeline.stats(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

async fn start_channel(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Form(form): Form<StartChannelForm>,
) -> Result<Json<Value>, ApiError> {
    let platform: Platform = tag
        .parse()
        .map_err(|e: ChannelError| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let open_id = form.open_id.trim();
    if open_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing parameter: open_id"));
    }
    let room_id = Some(form.room_id.trim().to_string()).filter(|r| !r.is_empty());
    let video_id = Some(form.video_id.trim().to_string()).filter(|v| !v.is_empty());
    if room_id.is_none() && video_id.is_none() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "missing parameter: room_id or video_id",
        ));
    }

    let credential = state.credentials.get(open_id).await.ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("no authorized account for open_id {}", open_id),
        )
    })?;
    if credential.is_expired() {
        tracing::warn!(open_id, "Refusing to start channel with an expired access token");
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            format!("access token for open_id {} has expired, authorize again", open_id),
        ));
    }
    let token = credential.access_token;

    tracing::info!(platform = %platform, open_id, ?room_id, ?video_id, "Starting channel for account");
    state
        .manager
        .start_for_account(platform, token, room_id, video_id)
        .await
        .map_err(|e| {
            tracing::error!(platform = %platform, error = %e, "Failed to start channel");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let strategy = match state.manager.get(platform.as_str()).await {
        Some(channel) => channel.strategy(),
        None => None,
    };
    Ok(Json(json!({
        "success": true,
        "platform": platform.as_str(),
        "strategy": strategy.map(|s| s.as_str()),
    })))
}

async fn simulate(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut options = state.manager.channel_options(Platform::Douyin);
    options.push_url = None;
    options.credential = None;
    if options.room_id.is_none() {
        options = options.with_room(SIMULATED_ROOM_ID);
    }

    tracing::info!("Starting simulated douyin channel");
    state.manager.start_with(options).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to start simulated channel");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Simulated events started, watch the logs for the processing flow",
    })))
}

fn oauth_platform(tag: &str) -> Result<Platform, ApiError> {
    let platform: Platform = tag
        .parse()
        .map_err(|e: ChannelError| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    if !platform.has_open_api() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("{} does not support OAuth", platform),
        ));
    }
    Ok(platform)
}

fn redirect_or_json(auth_url: String, format: Option<&str>) -> Response {
    if format == Some("json") {
        return Json(json!({"success": true, "auth_url": auth_url})).into_response();
    }
    (StatusCode::FOUND, [(header::LOCATION, auth_url)]).into_response()
}

async fn oauth_authorize(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    oauth_platform(&tag)?;
    let auth_url = state.oauth.authorize_url(DEFAULT_SCOPE).await;
    Ok(redirect_or_json(auth_url, query.format.as_deref()))
}

async fn oauth_whitelist(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    oauth_platform(&tag)?;
    let auth_url = state.oauth.authorize_url(WHITELIST_SCOPE).await;
    Ok(redirect_or_json(auth_url, query.format.as_deref()))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing authorization code"))?;
    let oauth_state = query.state.unwrap_or_default();

    let credential = state
        .oauth
        .handle_callback(&code, &oauth_state)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "OAuth callback failed");
            let status = match e {
                OAuthError::UnknownState(_) => StatusCode::BAD_REQUEST,
                OAuthError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            };
            api_error(status, e.to_string())
        })?;

    let body = json!({
        "success": true,
        "open_id": credential.open_id,
        "nickname": credential.nickname,
        "scope": credential.scope,
        "expires_in": credential.expires_in,
    });
    state.credentials.insert(credential).await;
    Ok(Json(body))
}

/// Binds the listener and serves the router until shut down.
pub struct ApiServer {
    addr: SocketAddr,
    app: Option<Router>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: Some(router(state)),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind and spawn the server task. Returns the bound address, which
    /// differs from the configured one when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.addr,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: self.addr,
            reason: e.to_string(),
        })?;

        let app = self.app.take().unwrap_or_default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!(addr = %local_addr, "HTTP server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("HTTP server shutting down");
                })
                .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::*;
    use crate::channels::{ManagerSettings, Strategy};
    use crate::config::{OAuthSettings, PipelineConfig};
    use crate::credentials::AccountCredential;
    use crate::limiter::RateLimiter;

    struct Harness {
        server: ApiServer,
        base: String,
        state: AppState,
        client: reqwest::Client,
    }

    impl Harness {
        async fn start(oauth_base: &str) -> Self {
            let limiter = Arc::new(RateLimiter::new(10, 20));
            let pipeline = Arc::new(Pipeline::builder(PipelineConfig::default(), limiter).build());
            let settings = ManagerSettings {
                // Nothing listens here, so pull ticks fail fast.
                api_base: "http://127.0.0.1:1".to_string(),
                ..ManagerSettings::default()
            };
            let manager = Arc::new(ChannelManager::new(
                pipeline.clone(),
                pipeline.reply_router(),
                settings,
            ));
            let oauth = Arc::new(DouyinOAuth::new(
                OAuthSettings {
                    app_id: "app-1".to_string(),
                    app_secret: Some(SecretString::from("secret")),
                    redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
                },
                oauth_base,
            ));
            let state = AppState::new(manager, pipeline, CredentialStore::new(), oauth);

            let mut server = ApiServer::new("127.0.0.1:0".parse().unwrap(), state.clone());
            let addr = server.start().await.unwrap();
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap();

            Self {
                server,
                base: format!("http://{}", addr),
                state,
                client,
            }
        }

        async fn post_form(&self, path: &str, body: &str) -> reqwest::Response {
            self.client
                .post(format!("{}{}", self.base, path))
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body.to_string())
                .send()
                .await
                .unwrap()
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.client
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap()
        }

        async fn stop(mut self) {
            self.state.manager.stop_all().await;
            self.server.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_health() {
        let h = Harness::start("http://127.0.0.1:1").await;
        let response = h.get("/health").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        h.stop().await;
    }

    #[tokio::test]
    async fn test_start_channel_validation() {
        let h = Harness::start("http://127.0.0.1:1").await;

        let missing_open_id = h.post_form("/api/channel/douyin/start", "room_id=123").await;
        assert_eq!(missing_open_id.status(), reqwest::StatusCode::BAD_REQUEST);

        let missing_scope = h.post_form("/api/channel/douyin/start", "open_id=o1").await;
        assert_eq!(missing_scope.status(), reqwest::StatusCode::BAD_REQUEST);

        let unknown = h
            .post_form("/api/channel/tiktok/start", "open_id=o1&room_id=123")
            .await;
        assert_eq!(unknown.status(), reqwest::StatusCode::BAD_REQUEST);

        let unauthorized = h
            .post_form("/api/channel/douyin/start", "open_id=o1&room_id=123")
            .await;
        assert_eq!(unauthorized.status(), reqwest::StatusCode::NOT_FOUND);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_start_channel_for_authorized_account() {
        let h = Harness::start("http://127.0.0.1:1").await;
        h.state
            .credentials
            .insert(AccountCredential::new("o1", SecretString::from("tok")))
            .await;

        let response = h
            .post_form("/api/channel/douyin/start", "open_id=o1&room_id=123")
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["strategy"], "pull");

        let status: Value = h.get("/api/status").await.json().await.unwrap();
        assert_eq!(status["status"], "running");
        assert_eq!(status["channels"]["douyin"], "online");
        assert_eq!(status["details"][0]["strategy"], "pull");
        assert!(status["pipeline"]["processed"].is_u64());

        h.stop().await;
    }

    #[tokio::test]
    async fn test_start_channel_rejects_expired_token() {
        let h = Harness::start("http://127.0.0.1:1").await;
        let mut credential = AccountCredential::new("o1", SecretString::from("tok"));
        credential.expires_in = 60;
        credential.obtained_at = chrono::Utc::now() - chrono::Duration::seconds(120);
        h.state.credentials.insert(credential).await;

        let response = h
            .post_form("/api/channel/douyin/start", "open_id=o1&room_id=123")
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert!(h.state.manager.get("douyin").await.is_none());

        h.stop().await;
    }

    #[tokio::test]
    async fn test_simulate_starts_synthetic_douyin() {
        let h = Harness::start("http://127.0.0.1:1").await;
        let response = h.post_form("/api/test/simulate", "").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let channel = h.state.manager.get("douyin").await.unwrap();
        assert_eq!(channel.strategy(), Some(Strategy::Synthetic));
        assert_eq!(channel.snapshot().room_id.as_deref(), Some(SIMULATED_ROOM_ID));
        h.stop().await;
    }

    #[tokio::test]
    async fn test_oauth_authorize_redirect_and_json() {
        let h = Harness::start("https://open.example.com").await;

        let redirect = h.get("/oauth/douyin").await;
        assert_eq!(redirect.status(), reqwest::StatusCode::FOUND);
        let location = redirect
            .headers()
            .get("location")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(location.starts_with("https://open.example.com/platform/oauth/connect/?"));
        assert!(location.contains("client_key=app-1"));

        let json: Value = h.get("/oauth/douyin?format=json").await.json().await.unwrap();
        assert_eq!(json["success"], true);
        assert!(json["auth_url"].as_str().unwrap().contains("response_type=code"));

        let whitelist: Value = h
            .get("/oauth/douyin/whitelist?format=json")
            .await
            .json()
            .await
            .unwrap();
        assert!(whitelist["auth_url"].as_str().unwrap().contains("trial.whitelist"));

        let unsupported = h.get("/oauth/wechat").await;
        assert_eq!(unsupported.status(), reqwest::StatusCode::BAD_REQUEST);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_oauth_callback_stores_credential() {
        let oauth_server = MockServer::start();
        oauth_server.mock(|when, then| {
            when.method(POST).path("/oauth/access_token/");
            then.status(200).json_body(json!({
                "data": {
                    "access_token": "act-1",
                    "refresh_token": "rft-1",
                    "expires_in": 86400,
                    "scope": "user_info",
                    "open_id": "o-42",
                    "error_code": 0
                }
            }));
        });
        oauth_server.mock(|when, then| {
            when.method(GET).path("/oauth/userinfo/");
            then.status(200).json_body(json!({
                "data": {"open_id": "o-42", "nickname": "Alice", "avatar": "", "error_code": 0}
            }));
        });

        let h = Harness::start(&oauth_server.base_url()).await;
        let json: Value = h.get("/oauth/douyin?format=json").await.json().await.unwrap();
        let auth_url = url::Url::parse(json["auth_url"].as_str().unwrap()).unwrap();
        let state = auth_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let response = h
            .get(&format!("/oauth/callback?code=c1&state={}", state))
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["open_id"], "o-42");
        assert_eq!(body["nickname"], "Alice");
        assert!(h.state.credentials.get("o-42").await.is_some());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_oauth_callback_rejects_bad_requests() {
        let h = Harness::start("http://127.0.0.1:1").await;
        let missing_code = h.get("/oauth/callback?state=abc").await;
        assert_eq!(missing_code.status(), reqwest::StatusCode::BAD_REQUEST);

        let unknown_state = h.get("/oauth/callback?code=c1&state=forged").await;
        assert_eq!(unknown_state.status(), reqwest::StatusCode::BAD_REQUEST);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_bind_on_occupied_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let occupied = listener.local_addr().unwrap();

        let h = Harness::start("http://127.0.0.1:1").await;
        let mut server = ApiServer::new(occupied, h.state.clone());
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { addr, .. } if addr == occupied));
        server.shutdown().await;
        h.stop().await;
    }
}
