use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Agent;

/// Declared transcript format of a session log directory (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Codex,
    Claude,
    Cursor,
    Gemini,
    Pi,
    Opencode,
    Unknown,
}

impl LogType {
    pub fn agent(&self) -> Option<Agent> {
        match self {
            LogType::Codex => Some(Agent::Codex),
            LogType::Claude => Some(Agent::Claude),
            LogType::Cursor => Some(Agent::Cursor),
            LogType::Gemini => Some(Agent::Gemini),
            LogType::Pi => Some(Agent::Pi),
            LogType::Opencode => Some(Agent::Opencode),
            LogType::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Codex => "codex",
            LogType::Claude => "claude",
            LogType::Cursor => "cursor",
            LogType::Gemini => "gemini",
            LogType::Pi => "pi",
            LogType::Opencode => "opencode",
            LogType::Unknown => "unknown",
        }
    }
}

/// Scan scheduling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Fixed,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub mode: ScanMode,
    pub interval_seconds: u64,
    pub interval_min_ms: u64,
    pub interval_max_ms: u64,
    pub full_rescan_interval_ms: u64,
    pub batch_debounce_ms: u64,
    pub recent_event_window: usize,
    pub include_meta_default: bool,
    pub status_running_ttl_ms: i64,
    pub status_waiting_ttl_ms: i64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Adaptive,
            interval_seconds: 5,
            interval_min_ms: 500,
            interval_max_ms: 10_000,
            full_rescan_interval_ms: 60_000,
            batch_debounce_ms: 150,
            recent_event_window: 200,
            include_meta_default: false,
            status_running_ttl_ms: 20_000,
            status_waiting_ttl_ms: 1_800_000,
        }
    }
}

/// Residency policy for trace event arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStrategy {
    AggressiveRecency,
    FullMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLoadMode {
    LazyFromDisk,
    Eager,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub strategy: RetentionStrategy,
    pub hot_trace_count: usize,
    pub warm_trace_count: usize,
    pub max_resident_events_per_hot_trace: usize,
    pub max_resident_events_per_warm_trace: usize,
    pub detail_load_mode: DetailLoadMode,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            strategy: RetentionStrategy::AggressiveRecency,
            hot_trace_count: 16,
            warm_trace_count: 64,
            max_resident_events_per_hot_trace: 5_000,
            max_resident_events_per_warm_trace: 0,
            detail_load_mode: DetailLoadMode::LazyFromDisk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub always_on: bool,
    pub mode: String,
    pub replacement: String,
    pub key_pattern: String,
    pub value_pattern: String,
}

impl RedactionConfig {
    pub const DEFAULT_KEY_PATTERN: &'static str = r"(?i)(token|key|secret|password|authorization|api[_-]?key|bearer|session[_-]?token|cookie|credential|OPENAI_API_KEY|ANTHROPIC_API_KEY)";
    pub const DEFAULT_VALUE_PATTERN: &'static str = r"sk-[A-Za-z0-9_-]{8,}";
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            always_on: true,
            mode: "mask".to_string(),
            replacement: "[REDACTED]".to_string(),
            key_pattern: Self::DEFAULT_KEY_PATTERN.to_string(),
            value_pattern: Self::DEFAULT_VALUE_PATTERN.to_string(),
        }
    }
}

/// What to do when a model has no configured rate card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownModelPolicy {
    NA,
    Ignore,
    EstimateWithDefault,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRate {
    pub model: String,
    pub input_per_1m_usd: f64,
    pub output_per_1m_usd: f64,
    pub cached_read_per_1m_usd: f64,
    pub cached_create_per_1m_usd: f64,
    pub reasoning_output_per_1m_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub enabled: bool,
    pub currency: String,
    pub unknown_model_policy: UnknownModelPolicy,
    pub model_rates: Vec<ModelRate>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            currency: "USD".to_string(),
            unknown_model_policy: UnknownModelPolicy::NA,
            model_rates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindowEntry {
    pub model: String,
    pub context_window_tokens: u64,
}

impl Default for ContextWindowEntry {
    fn default() -> Self {
        Self {
            model: String::new(),
            context_window_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub default_context_window_tokens: u64,
    pub context_windows: Vec<ContextWindowEntry>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_context_window_tokens: 200_000,
            context_windows: Vec::new(),
        }
    }
}

impl ModelsConfig {
    /// Context window for a model, falling back to the configured default.
    pub fn context_window_for(&self, model: &str) -> u64 {
        self.context_windows
            .iter()
            .find(|e| e.model == model)
            .map(|e| e.context_window_tokens)
            .unwrap_or(self.default_context_window_tokens)
    }
}

/// One discovery source: where to look and what to expect there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProfile {
    pub enabled: bool,
    pub roots: Vec<String>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub max_depth: usize,
    pub agent_hint: Option<Agent>,
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            roots: Vec::new(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            max_depth: 8,
            agent_hint: None,
        }
    }
}

/// Convenience entry: a directory plus the format its transcripts use.
/// The legacy form is a bare string; the log type is then inferred from
/// well-known path markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionLogDirectory {
    Typed { directory: String, log_type: LogType },
    Legacy(String),
}

impl SessionLogDirectory {
    /// Resolve to a (directory, log_type) pair, inferring the type for
    /// legacy entries from well-known path markers.
    pub fn resolve(&self) -> (String, LogType) {
        match self {
            SessionLogDirectory::Typed {
                directory,
                log_type,
            } => (directory.clone(), *log_type),
            SessionLogDirectory::Legacy(directory) => {
                (directory.clone(), infer_log_type(directory))
            }
        }
    }
}

/// Map a bare directory string to a log type by well-known markers.
pub fn infer_log_type(directory: &str) -> LogType {
    if directory.contains(".codex") {
        LogType::Codex
    } else if directory.contains(".claude") {
        LogType::Claude
    } else if directory.contains(".gemini") {
        LogType::Gemini
    } else if directory.contains(".pi") {
        LogType::Pi
    } else if directory.contains(".cursor") {
        LogType::Cursor
    } else if directory.contains("opencode") {
        LogType::Opencode
    } else {
        LogType::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceInspectorConfig {
    pub include_meta_default: bool,
    pub top_model_count: usize,
    pub show_agent_badges: bool,
    pub show_health_diagnostics: bool,
}

impl Default for TraceInspectorConfig {
    fn default() -> Self {
        Self {
            include_meta_default: false,
            top_model_count: 3,
            show_agent_badges: true,
            show_health_diagnostics: false,
        }
    }
}

/// Full daemon configuration. The daemon core treats this as a supplied
/// value; reading/merging the TOML file happens at the binary edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub retention: RetentionConfig,
    pub redaction: RedactionConfig,
    pub cost: CostConfig,
    pub models: ModelsConfig,
    pub sources: BTreeMap<String, SourceProfile>,
    pub session_log_directories: Vec<SessionLogDirectory>,
    pub trace_inspector: TraceInspectorConfig,
}

impl Config {
    /// Rate card for a model, if configured.
    pub fn rate_for(&self, model: &str) -> Option<&ModelRate> {
        self.cost.model_rates.iter().find(|r| r.model == model)
    }
}
