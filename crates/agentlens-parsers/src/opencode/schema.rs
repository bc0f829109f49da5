use serde::Deserialize;
use serde_json::Value;

/// `storage/session/<scope>/<id>.json` (or a `session_diff` placeholder)
#[derive(Debug, Deserialize)]
pub(crate) struct OpencodeSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Project directory the session ran in
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub time: Option<OpencodeTime>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct OpencodeTime {
    #[serde(default)]
    pub created: Option<f64>,
    #[serde(default)]
    pub updated: Option<f64>,
}

/// `storage/message/<sessionId>/<msgId>.json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpencodeMessage {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub time: Option<OpencodeTime>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub tokens: Option<OpencodeTokens>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct OpencodeTokens {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache: OpencodeCacheTokens,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct OpencodeCacheTokens {
    #[serde(default)]
    pub read: u64,
    #[serde(default)]
    pub write: u64,
}

/// `storage/part/<msgId>/<partId>.json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpencodePart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub state: Option<OpencodeToolState>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpencodeToolState {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
}
