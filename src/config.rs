use crate::auth::{ActivationPolicy, DEFAULT_KEY_VARS};
use crate::gateway::ModelIds;
use crate::parser::SummaryFallback;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_INDEX_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_REFRESH_SECS: u64 = 300;
pub const DEFAULT_QUICK_SYMBOLS: [&str; 5] = ["AAPL", "NVDA", "TSLA", "BTCUSD", "ETHUSD"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub key_vars: Vec<String>,
    pub models: ModelIds,
    pub request_timeout: Duration,
    pub refresh_interval: Duration,
    /// Arm the periodic index refresh once authorized. Off for one-shot CLI runs.
    pub auto_refresh: bool,
    pub activation_delay: Duration,
    pub activation_policy: ActivationPolicy,
    pub summary_fallback: SummaryFallback,
    pub default_symbol: String,
    pub quick_symbols: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            key_vars: DEFAULT_KEY_VARS.iter().map(|v| v.to_string()).collect(),
            models: ModelIds {
                index: DEFAULT_INDEX_MODEL.to_string(),
                analysis: DEFAULT_ANALYSIS_MODEL.to_string(),
                chat: DEFAULT_ANALYSIS_MODEL.to_string(),
            },
            request_timeout: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            auto_refresh: true,
            activation_delay: Duration::from_millis(1000),
            activation_policy: ActivationPolicy::Optimistic,
            summary_fallback: SummaryFallback::Empty,
            default_symbol: "AAPL".to_string(),
            quick_symbols: DEFAULT_QUICK_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup. Bad values warn and keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get("CHARTLENS_API_BASE_URL") {
            cfg.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("CHARTLENS_INDEX_MODEL") {
            cfg.models.index = model;
        }
        if let Some(model) = get("CHARTLENS_ANALYSIS_MODEL") {
            cfg.models.analysis = model.clone();
            cfg.models.chat = model;
        }
        if let Some(model) = get("CHARTLENS_CHAT_MODEL") {
            cfg.models.chat = model;
        }

        if let Some(secs) = parse_positive(get("CHARTLENS_REQUEST_TIMEOUT_SECS"), "CHARTLENS_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(get("CHARTLENS_REFRESH_SECS"), "CHARTLENS_REFRESH_SECS") {
            cfg.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_positive(get("CHARTLENS_ACTIVATION_DELAY_MS"), "CHARTLENS_ACTIVATION_DELAY_MS") {
            cfg.activation_delay = Duration::from_millis(ms);
        }

        if let Some(raw) = get("CHARTLENS_ACTIVATION") {
            match ActivationPolicy::parse(&raw) {
                Some(policy) => cfg.activation_policy = policy,
                None => warn!(
                    "Unknown CHARTLENS_ACTIVATION={} ; defaulting to optimistic. Allowed values: optimistic | verify",
                    raw
                ),
            }
        }
        if let Some(raw) = get("CHARTLENS_SUMMARY_FALLBACK") {
            match SummaryFallback::parse(&raw) {
                Some(fallback) => cfg.summary_fallback = fallback,
                None => warn!(
                    "Unknown CHARTLENS_SUMMARY_FALLBACK={} ; defaulting to empty. Allowed values: empty | first-line",
                    raw
                ),
            }
        }

        if let Some(symbol) = get("CHARTLENS_DEFAULT_SYMBOL") {
            cfg.default_symbol = symbol.to_uppercase();
        }
        if let Some(list) = get("CHARTLENS_QUICK_SYMBOLS") {
            let symbols = parse_symbol_list(&list);
            if !symbols.is_empty() {
                cfg.quick_symbols = symbols;
            }
        }

        cfg
    }
}

fn parse_positive(raw: Option<String>, name: &str) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warn!("Ignoring {}={} (expected a positive integer)", name, raw);
            None
        }
    }
}

pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for s in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !s.is_empty() && !symbols.contains(&s) {
            symbols.push(s);
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.models.index, DEFAULT_INDEX_MODEL);
        assert_eq!(cfg.models.chat, DEFAULT_ANALYSIS_MODEL);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(300));
        assert_eq!(cfg.activation_policy, ActivationPolicy::Optimistic);
        assert_eq!(cfg.summary_fallback, SummaryFallback::Empty);
        assert_eq!(cfg.key_vars, vec!["GEMINI_API_KEY", "API_KEY"]);
    }

    #[test]
    fn test_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("CHARTLENS_API_BASE_URL", "http://localhost:9000/models/"),
            ("CHARTLENS_ANALYSIS_MODEL", "vision-x"),
            ("CHARTLENS_REFRESH_SECS", "60"),
            ("CHARTLENS_ACTIVATION", "verify"),
            ("CHARTLENS_SUMMARY_FALLBACK", "first-line"),
            ("CHARTLENS_DEFAULT_SYMBOL", "msft"),
            ("CHARTLENS_QUICK_SYMBOLS", "spy, qqq,SPY,, iwm"),
        ]));
        assert_eq!(cfg.api_base_url, "http://localhost:9000/models");
        assert_eq!(cfg.models.analysis, "vision-x");
        assert_eq!(cfg.models.chat, "vision-x");
        assert_eq!(cfg.refresh_interval, Duration::from_secs(60));
        assert_eq!(cfg.activation_policy, ActivationPolicy::Verify);
        assert_eq!(cfg.summary_fallback, SummaryFallback::FirstLine);
        assert_eq!(cfg.default_symbol, "MSFT");
        assert_eq!(cfg.quick_symbols, vec!["SPY", "QQQ", "IWM"]);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("CHARTLENS_REFRESH_SECS", "0"),
            ("CHARTLENS_REQUEST_TIMEOUT_SECS", "soon"),
            ("CHARTLENS_ACTIVATION", "yolo"),
        ]));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(DEFAULT_REFRESH_SECS));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.activation_policy, ActivationPolicy::Optimistic);
    }
}
