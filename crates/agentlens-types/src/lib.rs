mod util;

pub mod config;
pub mod envelope;
pub mod event;
pub mod summary;
pub mod time;

pub use config::*;
pub use envelope::*;
pub use event::*;
pub use summary::*;
pub use util::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent that produced a transcript (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Codex,
    Claude,
    Cursor,
    Gemini,
    Pi,
    Opencode,
}

impl Agent {
    pub const ALL: [Agent; 6] = [
        Agent::Codex,
        Agent::Claude,
        Agent::Cursor,
        Agent::Gemini,
        Agent::Pi,
        Agent::Opencode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Codex => "codex",
            Agent::Claude => "claude",
            Agent::Cursor => "cursor",
            Agent::Gemini => "gemini",
            Agent::Pi => "pi",
            Agent::Opencode => "opencode",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codex" => Ok(Agent::Codex),
            "claude" | "claude_code" => Ok(Agent::Claude),
            "cursor" => Ok(Agent::Cursor),
            "gemini" => Ok(Agent::Gemini),
            "pi" => Ok(Agent::Pi),
            "opencode" => Ok(Agent::Opencode),
            other => Err(format!("unknown agent: {}", other)),
        }
    }
}

/// Normalized kind of a transcript event (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    System,
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Reasoning,
    Meta,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::System,
        EventKind::User,
        EventKind::Assistant,
        EventKind::ToolUse,
        EventKind::ToolResult,
        EventKind::Reasoning,
        EventKind::Meta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::System => "system",
            EventKind::User => "user",
            EventKind::Assistant => "assistant",
            EventKind::ToolUse => "tool_use",
            EventKind::ToolResult => "tool_result",
            EventKind::Reasoning => "reasoning",
            EventKind::Meta => "meta",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_round_trip() {
        for agent in Agent::ALL {
            let parsed: Agent = agent.as_str().parse().unwrap();
            assert_eq!(parsed, agent);
        }
        assert!("vscode".parse::<Agent>().is_err());
    }

    #[test]
    fn test_event_kind_serde_names() {
        let json = serde_json::to_string(&EventKind::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
        let back: EventKind = serde_json::from_str("\"tool_result\"").unwrap();
        assert_eq!(back, EventKind::ToolResult);
    }
}
