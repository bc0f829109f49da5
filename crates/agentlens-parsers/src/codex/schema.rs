use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum CodexRecord {
    SessionMeta(SessionMetaRecord),
    ResponseItem(ResponseItemRecord),
    EventMsg(EventMsgRecord),
    TurnContext(TurnContextRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionMetaRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub payload: SessionMetaPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionMetaPayload {
    pub id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub cli_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseItemRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub payload: ResponseItemPayload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum ResponseItemPayload {
    Message(MessagePayload),
    Reasoning(ReasoningPayload),
    FunctionCall(FunctionCallPayload),
    FunctionCallOutput(FunctionCallOutputPayload),
    WebSearchCall(WebSearchCallPayload),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePayload {
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum MessageContent {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReasoningPayload {
    #[serde(default)]
    pub summary: Vec<SummaryText>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum SummaryText {
    SummaryText {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCallPayload {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    pub call_id: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCallOutputPayload {
    pub call_id: String,
    #[serde(default)]
    pub output: FunctionOutput,
}

/// Output may be a bare string or a structured body with a content field
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
pub(crate) enum FunctionOutput {
    Text(String),
    Structured(Value),
    #[default]
    Missing,
}

impl FunctionOutput {
    pub fn to_text(&self) -> String {
        match self {
            FunctionOutput::Text(s) => s.clone(),
            FunctionOutput::Structured(v) => v
                .get("content")
                .and_then(|c| c.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| v.to_string()),
            FunctionOutput::Missing => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebSearchCallPayload {
    #[serde(default)]
    pub action: Option<WebAction>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventMsgRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub payload: EventMsgPayload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum EventMsgPayload {
    TokenCount(TokenCountPayload),
    #[serde(other)]
    Unknown,
}

/// Token counters arrive either nested under `info` (cumulative + delta)
/// or flat as `total`/`last` in older logs.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenCountPayload {
    #[serde(default)]
    pub info: Option<TokenInfo>,
    #[serde(default)]
    pub total: Option<CodexTokenUsage>,
    #[serde(default)]
    pub last: Option<CodexTokenUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenInfo {
    pub total_token_usage: CodexTokenUsage,
    pub last_token_usage: CodexTokenUsage,
    #[serde(default)]
    pub model_context_window: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct CodexTokenUsage {
    #[serde(default, alias = "input_tokens")]
    pub input: u64,
    #[serde(default, alias = "cached_input_tokens", alias = "cached")]
    pub cached_input: u64,
    #[serde(default, alias = "output_tokens")]
    pub output: u64,
    #[serde(default, alias = "reasoning_output_tokens")]
    pub reasoning_output: u64,
    #[serde(default, alias = "total_tokens")]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TurnContextRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub payload: TurnContextPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TurnContextPayload {
    pub model: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub effort: Option<String>,
}
