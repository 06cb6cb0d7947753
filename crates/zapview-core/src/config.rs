use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::{kinds, DEFAULT_COLOR_MODE, DEFAULT_PROFILE_RELAYS, DEFAULT_STATS_API_URL};
use crate::error::{Result, ZapError};

/// Configuration of a single zap view.
///
/// Fields are private: the only way to obtain a `ViewConfig` is through
/// [`ViewConfig::new`] (or deserialization, which goes through the same
/// validation), so every instance has an identifier and at least one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawViewConfig")]
pub struct ViewConfig {
    identifier: String,
    relay_endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_visible: Option<usize>,
    color_mode: bool,
}

/// Unvalidated wire shape of [`ViewConfig`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawViewConfig {
    #[serde(default)]
    identifier: String,
    #[serde(default, alias = "relayUrls")]
    relay_endpoints: Vec<String>,
    #[serde(default)]
    max_visible: Option<usize>,
    #[serde(default)]
    color_mode: Option<bool>,
}

impl TryFrom<RawViewConfig> for ViewConfig {
    type Error = ZapError;

    fn try_from(raw: RawViewConfig) -> Result<Self> {
        let mut config = ViewConfig::new(raw.identifier, raw.relay_endpoints)?;
        config.max_visible = raw.max_visible;
        config.color_mode = raw.color_mode.unwrap_or(DEFAULT_COLOR_MODE);
        Ok(config)
    }
}

impl ViewConfig {
    /// Validate and build a view configuration.
    ///
    /// Relay entries are trimmed and blank entries dropped; the identifier must be
    /// non-empty after trimming and at least one relay must remain.
    pub fn new<I, S>(identifier: impl Into<String>, relay_endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identifier = identifier.into().trim().to_string();
        if identifier.is_empty() {
            return Err(ZapError::configuration("identifier is required"));
        }

        let relay_endpoints: Vec<String> = relay_endpoints
            .into_iter()
            .map(|url| url.into().trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if relay_endpoints.is_empty() {
            return Err(ZapError::configuration(
                "at least one relay endpoint is required",
            ));
        }

        Ok(Self {
            identifier,
            relay_endpoints,
            max_visible: None,
            color_mode: DEFAULT_COLOR_MODE,
        })
    }

    pub fn with_max_visible(mut self, max_visible: usize) -> Self {
        self.max_visible = Some(max_visible);
        self
    }

    pub fn with_color_mode(mut self, color_mode: bool) -> Self {
        self.color_mode = color_mode;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn relay_endpoints(&self) -> &[String] {
        &self.relay_endpoints
    }

    pub fn max_visible(&self) -> Option<usize> {
        self.max_visible
    }

    pub fn color_mode(&self) -> bool {
        self.color_mode
    }
}

/// Split a comma separated relay list (`"wss://a,wss://b"`).
pub fn parse_relay_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Interpret a colour-mode attribute. Only "true"/"false" (any case) are honoured.
pub fn parse_color_mode(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        _ => DEFAULT_COLOR_MODE,
    }
}

/// How the stats fold treats a receipt whose invoice amount cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndecodedAmountPolicy {
    /// Leave the event out of the aggregate entirely
    #[default]
    Exclude,
    /// Count the event but contribute no amount
    CountOnly,
}

/// Pipeline tunables. Every field has a default, so a partial JSON file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Page size of the initial request, and the cache size needed to arm pagination
    pub initial_load_count: usize,
    /// Page size of each `load_more` request
    pub additional_load_count: usize,
    /// Upper bound on a pagination round-trip and on waiting for EOSE
    pub load_timeout_ms: u64,
    /// Micro-batch flush interval
    pub buffer_interval_ms: u64,
    /// Minimum spacing between two flushes
    pub buffer_min_interval_ms: u64,
    /// Debounce applied to "near end of list" signals
    pub scroll_debounce_ms: u64,
    /// Timeout of a grouped reference/profile lookup
    pub metadata_timeout_ms: u64,
    /// Timeout of single-shot lookups and the external stats query
    pub request_timeout_ms: u64,
    pub reference_cache_ttl_ms: u64,
    pub profile_cache_ttl_ms: u64,
    pub nip05_timeout_ms: u64,
    pub reference_batch_size: usize,
    pub reference_batch_delay_ms: u64,
    pub profile_batch_size: usize,
    pub profile_batch_delay_ms: u64,
    pub profile_relays: Vec<String>,
    pub reference_kinds: Vec<u16>,
    pub undecoded_amount_policy: UndecodedAmountPolicy,
    /// External aggregate stats endpoint; `None` disables the fallback query
    pub stats_api_url: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            initial_load_count: 15,
            additional_load_count: 20,
            load_timeout_ms: 10_000,
            buffer_interval_ms: 500,
            buffer_min_interval_ms: 100,
            scroll_debounce_ms: 500,
            metadata_timeout_ms: 20_000,
            request_timeout_ms: 2_000,
            reference_cache_ttl_ms: 300_000,
            profile_cache_ttl_ms: 1_800_000,
            nip05_timeout_ms: 5_000,
            reference_batch_size: 20,
            reference_batch_delay_ms: 100,
            profile_batch_size: 20,
            profile_batch_delay_ms: 100,
            profile_relays: DEFAULT_PROFILE_RELAYS.iter().map(|s| s.to_string()).collect(),
            reference_kinds: kinds::REFERENCE_KINDS.to_vec(),
            undecoded_amount_policy: UndecodedAmountPolicy::default(),
            stats_api_url: Some(DEFAULT_STATS_API_URL.to_string()),
        }
    }
}

impl CoreConfig {
    /// Load tunables from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn buffer_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_interval_ms)
    }

    pub fn buffer_min_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_min_interval_ms)
    }

    pub fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reference_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.reference_cache_ttl_ms)
    }

    pub fn profile_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.profile_cache_ttl_ms)
    }

    pub fn nip05_timeout(&self) -> Duration {
        Duration::from_millis(self.nip05_timeout_ms)
    }

    pub fn reference_batch_delay(&self) -> Duration {
        Duration::from_millis(self.reference_batch_delay_ms)
    }

    pub fn profile_batch_delay(&self) -> Duration {
        Duration::from_millis(self.profile_batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_view_config_requires_identifier() {
        let err = ViewConfig::new("  ", ["wss://relay.example"]).unwrap_err();
        assert!(matches!(err, ZapError::Configuration { .. }));
    }

    #[test]
    fn test_view_config_requires_relays() {
        let err = ViewConfig::new("note1abc", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ZapError::Configuration { .. }));

        let err = ViewConfig::new("note1abc", [" ", ""]).unwrap_err();
        assert!(matches!(err, ZapError::Configuration { .. }));
    }

    #[test]
    fn test_view_config_trims_relays() {
        let config = ViewConfig::new("note1abc", [" wss://a ", "", "wss://b"]).unwrap();
        assert_eq!(config.relay_endpoints(), &["wss://a", "wss://b"]);
        assert!(config.color_mode());
        assert_eq!(config.max_visible(), None);
    }

    #[test]
    fn test_view_config_from_json() {
        let json = r#"{"identifier": "note1abc", "relayUrls": ["wss://a"], "maxVisible": 30, "colorMode": false}"#;
        let config: ViewConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.identifier(), "note1abc");
        assert_eq!(config.relay_endpoints(), &["wss://a"]);
        assert_eq!(config.max_visible(), Some(30));
        assert!(!config.color_mode());
    }

    #[test]
    fn test_view_config_from_json_rejects_missing_relays() {
        let json = r#"{"identifier": "note1abc"}"#;
        assert!(serde_json::from_str::<ViewConfig>(json).is_err());
    }

    #[test]
    fn test_parse_relay_list() {
        assert_eq!(
            parse_relay_list("wss://a, wss://b,,"),
            vec!["wss://a".to_string(), "wss://b".to_string()]
        );
        assert!(parse_relay_list("").is_empty());
    }

    #[test]
    fn test_parse_color_mode() {
        assert!(parse_color_mode(Some("TRUE")));
        assert!(!parse_color_mode(Some("false")));
        assert_eq!(parse_color_mode(Some("maybe")), DEFAULT_COLOR_MODE);
        assert_eq!(parse_color_mode(None), DEFAULT_COLOR_MODE);
    }

    #[test]
    fn test_core_config_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"{{"initial_load_count": 5, "undecoded_amount_policy": "count_only", "stats_api_url": null}}"#
        )
        .unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.initial_load_count, 5);
        assert_eq!(config.additional_load_count, 20);
        assert_eq!(config.undecoded_amount_policy, UndecodedAmountPolicy::CountOnly);
        assert!(config.stats_api_url.is_none());
        assert_eq!(config.profile_relays.len(), DEFAULT_PROFILE_RELAYS.len());
    }

    #[test]
    fn test_core_config_missing_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(CoreConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
