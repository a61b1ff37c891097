//! Session controller shared by every front end.
//!
//! All mutable state (chat history, analysis, index board, authorization)
//! lives in one [`SessionState`] behind a tokio mutex. The lock is never held
//! across a model call, so an index refresh, an analysis and a chat reply can
//! be in flight together; each one updates only its own slice when it lands.

use crate::annotate::strip_markup;
use crate::auth::{ActivationPolicy, AuthState, Authorization, CredentialSource, PickerOutcome, Transition};
use crate::config::AppConfig;
use crate::gateway::{ChatMessage, GatewayError, ImagePayload, IndexQuote, ModelGateway};
use crate::gemini::GeminiTransport;
use crate::markdown;
use crate::parser::{AnalysisResult, ResponseParser};
use crate::prompts;
use crate::refresh::{RefreshHandle, spawn_deferred};
use anyhow::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const MAX_NOTICES: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AnalysisState {
    pub analyzing: bool,
    pub symbol: Option<String>,
    pub result: Option<AnalysisResult>,
    pub analysis_html: Option<String>,
    pub error: Option<String>,
    pub image_preview: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexBoard {
    pub quotes: Vec<IndexQuote>,
    pub updated_at: Option<String>,
    pub loading: bool,
}

/// Read-only copy handed to the presentational layers.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub symbol: String,
    pub quick_symbols: Vec<String>,
    pub chat: Vec<ChatMessage>,
    pub chat_loading: bool,
    pub analysis: AnalysisState,
    pub indices: IndexBoard,
    pub auth: AuthState,
    pub auth_prompt: bool,
    pub notices: Vec<Notice>,
}

struct SessionState {
    symbol: String,
    quick_symbols: Vec<String>,
    chat: Vec<ChatMessage>,
    chat_loading: bool,
    analysis: AnalysisState,
    analyses_pending: usize,
    indices: IndexBoard,
    auth: Authorization,
    notices: VecDeque<Notice>,
    refresher: Option<RefreshHandle>,
    deferred_refresh: Option<JoinHandle<()>>,
    closed: bool,
}

impl SessionState {
    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push_back(Notice { level, message: message.into() });
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
    }
}

struct Inner {
    gateway: ModelGateway,
    credentials: Arc<dyn CredentialSource>,
    config: AppConfig,
    state: Mutex<SessionState>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(config: AppConfig, gateway: ModelGateway, credentials: Arc<dyn CredentialSource>) -> Self {
        let state = SessionState {
            symbol: config.default_symbol.clone(),
            quick_symbols: config.quick_symbols.clone(),
            chat: vec![ChatMessage::model(prompts::GREETING)],
            chat_loading: false,
            analysis: AnalysisState::default(),
            analyses_pending: 0,
            indices: IndexBoard::default(),
            auth: Authorization::default(),
            notices: VecDeque::new(),
            refresher: None,
            deferred_refresh: None,
            closed: false,
        };
        Self {
            inner: Arc::new(Inner {
                gateway,
                credentials,
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Wires the Gemini transport and response parser from configuration.
    pub fn from_config(config: AppConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let transport = GeminiTransport::new(&config.api_base_url, config.request_timeout)?;
        let gateway = ModelGateway::new(
            Arc::new(transport),
            config.models.clone(),
            ResponseParser::new(config.summary_fallback),
        );
        Ok(Self::new(config, gateway, credentials))
    }

    // ── Authorization ───────────────────────────────────────────────────────

    /// Explicit credential check; run once at startup.
    pub async fn check_auth(&self) -> AuthState {
        let usable = self.inner.credentials.has_selected().await;
        let mut state = self.inner.state.lock().await;
        let transition = state.auth.apply_check(usable);
        if !usable {
            state.notify(NoticeLevel::Error, "No API key configured. Activate a key to continue.");
        }
        self.apply_transition(&mut state, transition);
        state.auth.state()
    }

    /// User asked to (re-)select a credential.
    pub async fn activate(&self) -> Result<PickerOutcome> {
        let outcome = self.inner.credentials.open_picker().await?;
        if outcome == PickerOutcome::Unavailable {
            let mut state = self.inner.state.lock().await;
            state.notify(
                NoticeLevel::Error,
                "No key picker is available here. Set GEMINI_API_KEY in the environment.",
            );
            return Ok(outcome);
        }

        let authorized = match self.inner.config.activation_policy {
            ActivationPolicy::Optimistic => {
                let mut state = self.inner.state.lock().await;
                let transition = state.auth.on_activated();
                self.apply_transition(&mut state, transition);
                state.notify(NoticeLevel::Info, "Activating key...");
                true
            }
            ActivationPolicy::Verify => {
                let usable = self.inner.credentials.has_selected().await;
                let mut state = self.inner.state.lock().await;
                let transition = state.auth.apply_check(usable);
                self.apply_transition(&mut state, transition);
                if usable {
                    state.auth.dismiss_prompt();
                    state.notify(NoticeLevel::Info, "Key verified.");
                } else {
                    state.notify(NoticeLevel::Error, "The selected key is not usable.");
                }
                usable
            }
        };

        if authorized {
            self.schedule_deferred_refresh().await;
        }
        Ok(outcome)
    }

    pub async fn dismiss_auth_prompt(&self) {
        self.inner.state.lock().await.auth.dismiss_prompt();
    }

    fn apply_transition(&self, state: &mut SessionState, transition: Transition) {
        match transition {
            Transition::BecameAuthorized => self.arm_refresher(state),
            Transition::BecameUnauthorized => {
                if let Some(handle) = state.refresher.take() {
                    handle.stop();
                }
            }
            Transition::Unchanged => {}
        }
    }

    fn handle_auth_failure(&self, state: &mut SessionState) {
        let transition = state.auth.on_auth_failure();
        self.apply_transition(state, transition);
        state.notify(NoticeLevel::Error, "Authentication required. Please select a valid API key.");
    }

    // ── Index board ─────────────────────────────────────────────────────────

    fn arm_refresher(&self, state: &mut SessionState) {
        if !self.inner.config.auto_refresh
            || state.closed
            || state.refresher.as_ref().is_some_and(|h| !h.is_finished())
        {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = RefreshHandle::spawn(self.inner.config.refresh_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let _ = Session { inner }.refresh_indices().await;
                }
            }
        });
        state.refresher = Some(handle);
    }

    async fn schedule_deferred_refresh(&self) {
        let weak = Arc::downgrade(&self.inner);
        let job = spawn_deferred(self.inner.config.activation_delay, async move {
            if let Some(inner) = weak.upgrade() {
                let _ = Session { inner }.refresh_indices().await;
            }
        });
        let mut state = self.inner.state.lock().await;
        if state.closed {
            job.abort();
            return;
        }
        if let Some(previous) = state.deferred_refresh.replace(job) {
            previous.abort();
        }
    }

    /// Out-of-band refresh that does not wait for the result. Goes through
    /// the refresh loop when one is armed so its period restarts.
    pub async fn request_refresh(&self) {
        let state = self.inner.state.lock().await;
        if let Some(handle) = state.refresher.as_ref().filter(|h| !h.is_finished()) {
            handle.refresh_now();
            return;
        }
        drop(state);
        let session = self.clone();
        tokio::spawn(async move {
            let _ = session.refresh_indices().await;
        });
    }

    /// Fetches a fresh snapshot. An empty fetch keeps the quotes on display.
    pub async fn refresh_indices(&self) -> Result<Vec<IndexQuote>, GatewayError> {
        self.inner.state.lock().await.indices.loading = true;

        let key = self.inner.credentials.current();
        let fetched = self.inner.gateway.fetch_indices(key.as_ref()).await;

        let mut state = self.inner.state.lock().await;
        state.indices.loading = false;
        match fetched {
            Ok(quotes) if !quotes.is_empty() => {
                state.indices.quotes = quotes;
                state.indices.updated_at = Some(chrono::Local::now().to_rfc3339());
                Ok(state.indices.quotes.clone())
            }
            Ok(_) => Ok(state.indices.quotes.clone()),
            Err(err) => {
                if err.is_auth() {
                    self.handle_auth_failure(&mut state);
                }
                Err(err)
            }
        }
    }

    // ── Analysis ────────────────────────────────────────────────────────────

    /// Analyzes a chart for the current symbol. With overlapping calls the
    /// response that arrives last is the one left on display.
    pub async fn analyze_image(&self, image: ImagePayload) -> Result<AnalysisResult, GatewayError> {
        let preview = image.to_data_url();
        let symbol = {
            let mut state = self.inner.state.lock().await;
            state.analyses_pending += 1;
            state.analysis = AnalysisState {
                analyzing: true,
                symbol: Some(state.symbol.clone()),
                image_preview: Some(preview.clone()),
                ..AnalysisState::default()
            };
            state.notify(NoticeLevel::Info, "Chart received, analysis started...");
            state.symbol.clone()
        };

        let key = self.inner.credentials.current();
        let outcome = self.inner.gateway.analyze_image(key.as_ref(), &symbol, &image).await;

        // Whoever lands last owns the slice, preview included.
        let mut state = self.inner.state.lock().await;
        state.analyses_pending = state.analyses_pending.saturating_sub(1);
        state.analysis.analyzing = state.analyses_pending > 0;
        state.analysis.symbol = Some(symbol.clone());
        state.analysis.image_preview = Some(preview);
        match &outcome {
            Ok(result) => {
                state.analysis.analysis_html = Some(markdown::to_html(&result.analysis));
                state.analysis.result = Some(result.clone());
                state.analysis.error = None;
                state.analysis.completed_at = Some(chrono::Local::now().to_rfc3339());
                state.notify(NoticeLevel::Info, "Analysis complete");
                info!("Analysis for {} stored", symbol);
            }
            Err(err) => {
                state.analysis.result = None;
                state.analysis.analysis_html = None;
                state.analysis.error = Some(err.to_string());
                if err.is_auth() {
                    self.handle_auth_failure(&mut state);
                } else {
                    state.notify(NoticeLevel::Error, err.to_string());
                }
                error!("Analysis for {} failed: {}", symbol, err);
            }
        }
        outcome
    }

    pub async fn clear_analysis(&self) {
        let mut state = self.inner.state.lock().await;
        state.analysis = AnalysisState {
            analyzing: state.analyses_pending > 0,
            ..AnalysisState::default()
        };
    }

    // ── Chat ────────────────────────────────────────────────────────────────

    /// Appends the user's message and, on success, the model's reply.
    /// A failed call leaves the user's message in history with no reply.
    pub async fn send_chat(&self, text: &str) -> Result<String, GatewayError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::InvalidRequest("message is empty".to_string()));
        }

        let (history, symbol, context) = {
            let mut state = self.inner.state.lock().await;
            if state.chat_loading {
                return Err(GatewayError::InvalidRequest("a reply is still pending".to_string()));
            }
            if !state.auth.is_authorized() {
                state.auth.show_prompt();
                return Err(GatewayError::AuthenticationRequired);
            }
            state.chat.push(ChatMessage::user(text));
            state.chat_loading = true;
            let context = state
                .analysis
                .result
                .as_ref()
                .map(|r| strip_markup(&r.analysis))
                .unwrap_or_default();
            (state.chat.clone(), state.symbol.clone(), context)
        };

        let key = self.inner.credentials.current();
        let outcome = self
            .inner
            .gateway
            .send_chat(key.as_ref(), &history, &symbol, &context)
            .await;

        let mut state = self.inner.state.lock().await;
        state.chat_loading = false;
        match &outcome {
            Ok(reply) => state.chat.push(ChatMessage::model(reply.clone())),
            Err(err) if err.is_auth() => self.handle_auth_failure(&mut state),
            Err(err) => {
                warn!("Chat failed: {}", err);
                state.notify(NoticeLevel::Error, err.to_string());
            }
        }
        outcome
    }

    // ── Misc ────────────────────────────────────────────────────────────────

    /// Lets a front end report its own failures (unreadable file, bad input)
    /// through the same notice queue.
    pub async fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.inner.state.lock().await.notify(level, message);
    }

    pub async fn set_symbol(&self, symbol: &str) -> Option<String> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return None;
        }
        let mut state = self.inner.state.lock().await;
        state.symbol = symbol.clone();
        Some(symbol)
    }

    pub async fn symbol(&self) -> String {
        self.inner.state.lock().await.symbol.clone()
    }

    pub async fn auth_state(&self) -> AuthState {
        self.inner.state.lock().await.auth.state()
    }

    /// Snapshot for rendering. `drain_notices` hands pending notices over once.
    pub async fn view(&self, drain_notices: bool) -> SessionView {
        let mut state = self.inner.state.lock().await;
        let notices = if drain_notices {
            state.notices.drain(..).collect()
        } else {
            state.notices.iter().cloned().collect()
        };
        SessionView {
            symbol: state.symbol.clone(),
            quick_symbols: state.quick_symbols.clone(),
            chat: state.chat.clone(),
            chat_loading: state.chat_loading,
            analysis: state.analysis.clone(),
            indices: state.indices.clone(),
            auth: state.auth.state(),
            auth_prompt: state.auth.prompt_visible(),
            notices,
        }
    }

    /// Cancels the refresh loop and any pending deferred refresh.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        if let Some(handle) = state.refresher.take() {
            handle.stop();
        }
        if let Some(job) = state.deferred_refresh.take() {
            job.abort();
        }
        info!("Session closed");
    }

    #[cfg(test)]
    async fn refresher_armed(&self) -> bool {
        self.inner.state.lock().await.refresher.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKey, EnvCredentials, SelectedCredential};
    use crate::gateway::TransportError;
    use crate::gateway::tests::{RoutedTransport, Scripted, models};
    use async_trait::async_trait;
    use std::time::Duration;

    fn test_config() -> AppConfig {
        AppConfig {
            models: models(),
            refresh_interval: Duration::from_secs(3600),
            activation_delay: Duration::from_millis(10),
            ..AppConfig::default()
        }
    }

    fn credentials(key: Option<&str>) -> Arc<SelectedCredential> {
        let source = SelectedCredential::new(EnvCredentials::new(["CHARTLENS_TEST_UNSET_KEY_VAR"]));
        if let Some(key) = key {
            source.select(key);
        }
        Arc::new(source)
    }

    fn session_with(
        config: AppConfig,
        transport: Arc<RoutedTransport>,
        creds: Arc<SelectedCredential>,
    ) -> Session {
        let gateway = ModelGateway::new(transport, config.models.clone(), ResponseParser::default());
        Session::new(config, gateway, creds)
    }

    const QUOTES: &str = r#"[{"name":"S&P 500","symbol":"^GSPC","change":10.0,"percent":"+0.2%","isUp":true}]"#;

    fn png() -> ImagePayload {
        ImagePayload::new(vec![1, 2, 3], "image/png")
    }

    #[tokio::test]
    async fn test_startup_without_key_prompts_and_stays_idle() {
        let transport = RoutedTransport::with(vec![]);
        let session = session_with(test_config(), transport.clone(), credentials(None));

        assert_eq!(session.check_auth().await, AuthState::Unauthorized);
        let view = session.view(true).await;
        assert!(view.auth_prompt);
        assert!(!view.notices.is_empty());
        assert!(!session.refresher_armed().await);

        assert_eq!(session.send_chat("hello").await, Err(GatewayError::AuthenticationRequired));
        assert_eq!(session.view(false).await.chat.len(), 1);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_authorized_startup_arms_refresh_and_fills_board() {
        let transport = RoutedTransport::with(vec![("index-model", vec![Scripted::Reply(QUOTES.to_string())])]);
        let session = session_with(test_config(), transport, credentials(Some("k")));

        assert_eq!(session.check_auth().await, AuthState::Authorized);
        assert!(session.refresher_armed().await);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let view = session.view(false).await;
        assert_eq!(view.indices.quotes.len(), 1);
        assert!(view.indices.updated_at.is_some());
        session.shutdown().await;
        assert!(!session.refresher_armed().await);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_stale_quotes() {
        let transport = RoutedTransport::with(vec![(
            "index-model",
            vec![
                Scripted::Reply(QUOTES.to_string()),
                Scripted::Reply("[]".to_string()),
                Scripted::Fail(TransportError::Http { status: 500, message: "boom".to_string() }),
            ],
        )]);
        let session = session_with(test_config(), transport, credentials(Some("k")));

        assert_eq!(session.refresh_indices().await.unwrap().len(), 1);
        assert_eq!(session.refresh_indices().await.unwrap().len(), 1);
        assert_eq!(session.refresh_indices().await.unwrap().len(), 1);
        assert_eq!(session.view(false).await.indices.quotes[0].symbol, "^GSPC");
    }

    #[tokio::test]
    async fn test_auth_failure_revokes_and_disarms() {
        let transport = RoutedTransport::with(vec![
            ("index-model", vec![Scripted::Reply("[]".to_string())]),
            (
                "vision-model",
                vec![Scripted::Fail(TransportError::Http {
                    status: 400,
                    message: "API key not valid".to_string(),
                })],
            ),
        ]);
        let session = session_with(test_config(), transport, credentials(Some("k")));
        session.check_auth().await;
        assert!(session.refresher_armed().await);

        assert_eq!(session.analyze_image(png()).await, Err(GatewayError::AuthenticationRequired));
        let view = session.view(false).await;
        assert_eq!(view.auth, AuthState::Unauthorized);
        assert!(view.auth_prompt);
        assert!(!view.analysis.analyzing);
        assert!(view.analysis.result.is_none());
        assert!(!session.refresher_armed().await);
    }

    #[tokio::test]
    async fn test_analysis_success_and_failure_states() {
        let transport = RoutedTransport::with(vec![(
            "vision-model",
            vec![
                Scripted::Reply("[SUMMARY]建議買入[ANALYSIS]## 趨勢\n**多頭**".to_string()),
                Scripted::Fail(TransportError::Http { status: 500, message: "model overloaded".to_string() }),
            ],
        )]);
        let session = session_with(test_config(), transport, credentials(Some("k")));
        session.set_symbol("nvda").await;

        let result = session.analyze_image(png()).await.unwrap();
        assert!(result.summary.contains("hl-buy"));
        let view = session.view(true).await;
        assert_eq!(view.analysis.symbol.as_deref(), Some("NVDA"));
        assert!(view.analysis.analysis_html.unwrap().contains("<strong>多頭</strong>"));
        assert!(view.analysis.image_preview.unwrap().starts_with("data:image/png;base64,"));

        let err = session.analyze_image(png()).await.unwrap_err();
        assert_eq!(err, GatewayError::AnalysisFailed("model overloaded".to_string()));
        let view = session.view(true).await;
        assert!(!view.analysis.analyzing);
        assert!(view.analysis.result.is_none());
        assert_eq!(view.analysis.error.as_deref(), Some("model overloaded"));
        assert!(view.notices.iter().any(|n| n.level == NoticeLevel::Error));
    }

    #[tokio::test]
    async fn test_last_response_to_arrive_wins() {
        let transport = RoutedTransport::with(vec![(
            "vision-model",
            vec![
                Scripted::Delayed(Duration::from_millis(80), "[SUMMARY]A[ANALYSIS]aapl".to_string()),
                Scripted::Delayed(Duration::from_millis(10), "[SUMMARY]T[ANALYSIS]tsla".to_string()),
            ],
        )]);
        let session = session_with(test_config(), transport, credentials(Some("k")));
        let aapl_chart = ImagePayload::new(vec![1], "image/png");
        let tsla_chart = ImagePayload::new(vec![2], "image/png");

        session.set_symbol("AAPL").await;
        let first = tokio::spawn({
            let s = session.clone();
            let chart = aapl_chart.clone();
            async move { s.analyze_image(chart).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.set_symbol("TSLA").await;
        let second = tokio::spawn({
            let s = session.clone();
            let chart = tsla_chart.clone();
            async move { s.analyze_image(chart).await }
        });

        second.await.unwrap().unwrap();
        let view = session.view(false).await;
        assert!(view.analysis.analyzing, "AAPL is still in flight");
        assert_eq!(view.analysis.symbol.as_deref(), Some("TSLA"));
        assert_eq!(view.analysis.image_preview, Some(tsla_chart.to_data_url()));

        first.await.unwrap().unwrap();
        let view = session.view(false).await;
        assert!(!view.analysis.analyzing);
        assert_eq!(view.analysis.symbol.as_deref(), Some("AAPL"));
        assert_eq!(view.analysis.result.unwrap().summary, "A");
        assert_eq!(view.analysis.image_preview, Some(aapl_chart.to_data_url()));
    }

    #[tokio::test]
    async fn test_chat_appends_and_grounds_on_analysis() {
        let transport = RoutedTransport::with(vec![
            ("vision-model", vec![Scripted::Reply("[SUMMARY]s[ANALYSIS]先觀望".to_string())]),
            (
                "chat-model",
                vec![
                    Scripted::Reply("keep waiting".to_string()),
                    Scripted::Fail(TransportError::Network("timeout".to_string())),
                ],
            ),
        ]);
        let session = session_with(test_config(), transport, credentials(Some("k")));
        session.check_auth().await;
        session.analyze_image(png()).await.unwrap();

        assert_eq!(session.send_chat("  what now?  ").await.unwrap(), "keep waiting");
        let chat = session.view(false).await.chat;
        assert_eq!(chat.len(), 3);
        assert_eq!(chat[1], ChatMessage::user("what now?"));
        assert_eq!(chat[2], ChatMessage::model("keep waiting"));

        assert!(matches!(session.send_chat("and then?").await, Err(GatewayError::ChatFailed(_))));
        let view = session.view(false).await;
        assert_eq!(view.chat.len(), 4);
        assert_eq!(view.chat[3], ChatMessage::user("and then?"));
        assert!(!view.chat_loading);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_optimistic_activation_trusts_picker() {
        let transport = RoutedTransport::with(vec![]);
        let creds = credentials(None);
        let session = session_with(test_config(), transport, creds.clone());
        session.check_auth().await;

        // Picker unavailable: nothing changes.
        assert_eq!(session.activate().await.unwrap(), PickerOutcome::Unavailable);
        assert_eq!(session.auth_state().await, AuthState::Unauthorized);

        creds.select("fresh-key");
        assert_eq!(session.activate().await.unwrap(), PickerOutcome::Opened);
        let view = session.view(false).await;
        assert_eq!(view.auth, AuthState::Authorized);
        assert!(!view.auth_prompt);
        assert!(session.refresher_armed().await);
        session.shutdown().await;
    }

    /// Picker that claims success without ever producing a key.
    struct HollowPicker;

    #[async_trait]
    impl CredentialSource for HollowPicker {
        fn current(&self) -> Option<ApiKey> {
            None
        }

        async fn open_picker(&self) -> Result<PickerOutcome> {
            Ok(PickerOutcome::Opened)
        }
    }

    #[tokio::test]
    async fn test_verify_activation_rejects_hollow_picker() {
        let config = AppConfig { activation_policy: ActivationPolicy::Verify, ..test_config() };
        let gateway = ModelGateway::new(RoutedTransport::with(vec![]), config.models.clone(), ResponseParser::default());
        let session = Session::new(config, gateway, Arc::new(HollowPicker));

        assert_eq!(session.activate().await.unwrap(), PickerOutcome::Opened);
        let view = session.view(true).await;
        assert_eq!(view.auth, AuthState::Unauthorized);
        assert!(view.auth_prompt);
        assert!(view.notices.iter().any(|n| n.level == NoticeLevel::Error));
        assert!(!session.refresher_armed().await);
    }

    #[tokio::test]
    async fn test_optimistic_activation_reconciles_on_next_failure() {
        let transport = RoutedTransport::with(vec![]);
        let config = test_config();
        let gateway = ModelGateway::new(transport, config.models.clone(), ResponseParser::default());
        let session = Session::new(config, gateway, Arc::new(HollowPicker));

        session.activate().await.unwrap();
        // The deferred refresh runs without a key and flips the state back.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.auth_state().await, AuthState::Unauthorized);
        assert!(!session.refresher_armed().await);
    }

    #[tokio::test]
    async fn test_notices_are_bounded_and_drained() {
        let session = session_with(test_config(), RoutedTransport::with(vec![]), credentials(None));
        for _ in 0..(MAX_NOTICES + 10) {
            session.check_auth().await;
        }
        assert_eq!(session.view(true).await.notices.len(), MAX_NOTICES);
        assert!(session.view(true).await.notices.is_empty());
    }
}
