//! Credential resolution and the authorization state machine.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Values that hosting templates leave behind when no key was configured.
const PLACEHOLDER_KEYS: [&str; 7] = [
    "\"\"",
    "''",
    "undefined",
    "null",
    "placeholder_api_key",
    "your_api_key",
    "your-api-key",
];

/// A usable provider key. Construction rejects empty and placeholder values.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if PLACEHOLDER_KEYS.contains(&lowered.as_str()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PickerOutcome {
    Opened,
    Unavailable,
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Key for the next outbound call, resolved fresh each time.
    fn current(&self) -> Option<ApiKey>;

    async fn has_selected(&self) -> bool {
        self.current().is_some()
    }

    async fn open_picker(&self) -> anyhow::Result<PickerOutcome>;
}

/// Reads the key straight from the process environment.
#[derive(Clone, Debug)]
pub struct EnvCredentials {
    vars: Vec<String>,
}

impl EnvCredentials {
    pub fn new<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { vars: vars.into_iter().map(Into::into).collect() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_VARS)
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    fn current(&self) -> Option<ApiKey> {
        self.vars
            .iter()
            .find_map(|var| std::env::var(var).ok().and_then(|v| ApiKey::parse(&v)))
    }

    async fn open_picker(&self) -> anyhow::Result<PickerOutcome> {
        Ok(PickerOutcome::Unavailable)
    }
}

/// Key chosen interactively by a front end, with the environment as fallback.
#[derive(Debug, Default)]
pub struct SelectedCredential {
    slot: RwLock<Option<ApiKey>>,
    fallback: EnvCredentials,
}

impl SelectedCredential {
    pub fn new(fallback: EnvCredentials) -> Self {
        Self { slot: RwLock::new(None), fallback }
    }

    /// Stores a key; returns false when the value is empty or a placeholder.
    pub fn select(&self, raw: &str) -> bool {
        let parsed = ApiKey::parse(raw);
        let accepted = parsed.is_some();
        match self.slot.write() {
            Ok(mut slot) => *slot = parsed,
            Err(poisoned) => *poisoned.into_inner() = parsed,
        }
        accepted
    }

    fn selected(&self) -> Option<ApiKey> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CredentialSource for SelectedCredential {
    fn current(&self) -> Option<ApiKey> {
        self.selected().or_else(|| self.fallback.current())
    }

    async fn open_picker(&self) -> anyhow::Result<PickerOutcome> {
        if self.selected().is_some() {
            Ok(PickerOutcome::Opened)
        } else {
            Ok(PickerOutcome::Unavailable)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    #[default]
    Unknown,
    Authorized,
    Unauthorized,
}

/// What to do once the credential picker has resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivationPolicy {
    /// Assume the user picked a working key; the next failing call corrects it.
    #[default]
    Optimistic,
    /// Re-run the explicit check before trusting the picker.
    Verify,
}

impl ActivationPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Some(Self::Optimistic),
            "verify" | "check" => Some(Self::Verify),
            _ => None,
        }
    }
}

/// Edge produced by a state change; the session reacts to these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    BecameAuthorized,
    BecameUnauthorized,
    Unchanged,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Authorization {
    state: AuthState,
    prompt_visible: bool,
}

impl Authorization {
    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.state == AuthState::Authorized
    }

    pub fn prompt_visible(&self) -> bool {
        self.prompt_visible
    }

    fn set(&mut self, next: AuthState) -> Transition {
        let previous = self.state;
        self.state = next;
        match (previous == next, next) {
            (true, _) => Transition::Unchanged,
            (false, AuthState::Authorized) => Transition::BecameAuthorized,
            (false, AuthState::Unauthorized) => Transition::BecameUnauthorized,
            (false, AuthState::Unknown) => Transition::Unchanged,
        }
    }

    /// Result of an explicit credential check.
    pub fn apply_check(&mut self, usable: bool) -> Transition {
        if usable {
            self.set(AuthState::Authorized)
        } else {
            self.prompt_visible = true;
            self.set(AuthState::Unauthorized)
        }
    }

    /// Any gateway call reported the credential missing or rejected.
    pub fn on_auth_failure(&mut self) -> Transition {
        self.prompt_visible = true;
        let transition = self.set(AuthState::Unauthorized);
        if transition == Transition::BecameUnauthorized {
            warn!("Credential rejected; authorization revoked");
        }
        transition
    }

    /// The picker resolved under the optimistic policy.
    pub fn on_activated(&mut self) -> Transition {
        self.prompt_visible = false;
        let transition = self.set(AuthState::Authorized);
        info!("Credential activated");
        transition
    }

    pub fn show_prompt(&mut self) {
        self.prompt_visible = true;
    }

    pub fn dismiss_prompt(&mut self) {
        self.prompt_visible = false;
    }
}
