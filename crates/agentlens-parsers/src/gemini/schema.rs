use serde::Deserialize;
use serde_json::Value;

/// One Gemini chat file: a single JSON object with the full message list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiSession {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project_hash: Option<String>,
    #[serde(default)]
    pub start_time: Option<Value>,
    #[serde(default)]
    pub last_updated: Option<Value>,
    #[serde(default)]
    pub messages: Vec<GeminiMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, rename = "type")]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    /// Message body: a string, a block list, or an object with parts
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thoughts: Option<Value>,
    #[serde(default)]
    pub tokens: Option<GeminiTokens>,
    #[serde(default)]
    pub tool_calls: Vec<GeminiToolCall>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct GeminiTokens {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cached: u64,
    #[serde(default)]
    pub thoughts: u64,
    #[serde(default)]
    pub tool: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    /// Completed calls embed a result holding a functionResponse
    #[serde(default)]
    pub result: Option<Value>,
}

/// Collect readable text out of whichever shape the message body uses.
pub(crate) fn message_text(message: &GeminiMessage) -> String {
    if let Some(text) = &message.text {
        return text.clone();
    }
    match &message.content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Object(obj)) => obj
            .get("parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Extract output text from a tool call result's functionResponse.
pub(crate) fn tool_result_text(result: &Value) -> String {
    let response = result
        .get("functionResponse")
        .and_then(|fr| fr.get("response"))
        .unwrap_or(result);
    for key in ["output", "content", "text", "result"] {
        if let Some(text) = response.get(key).and_then(|v| v.as_str()) {
            return text.to_string();
        }
    }
    if let Some(s) = response.as_str() {
        return s.to_string();
    }
    response.to_string()
}
