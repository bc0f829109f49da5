use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum PiRecord {
    Session(PiSessionRecord),
    Message(PiMessageRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PiSessionRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PiMessageRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub message: PiMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PiMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub content: PiContentField,
    #[serde(default)]
    pub usage: Option<PiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum PiContentField {
    Text(String),
    Blocks(Vec<PiContent>),
}

/// Pi content blocks are camelCase-tagged: text, toolCall, toolResult
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub(crate) enum PiContent {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PiUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub cost: Option<PiCost>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PiCost {
    #[serde(default)]
    pub total: f64,
}
