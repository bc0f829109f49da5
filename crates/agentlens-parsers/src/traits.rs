use agentlens_types::{Agent, NormalizedEvent, TokenTotals};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::Result;

/// State persisted between parses of the same trace so a grown file can be
/// resumed from where the previous parse stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Bytes (or records, for non-byte-oriented formats) consumed so far
    pub offset: u64,
    /// Hex sha256 over the first `offset` bytes; a mismatch forces a full
    /// reparse because the prefix was rewritten
    pub prefix_sha256: String,
    /// Events emitted so far; suffix events continue numbering from here
    pub event_count: u64,
    /// Parser-specific state that must survive the append boundary
    pub carry: ParserCarry,
}

/// Cross-append parser state.
/// Small by construction: a model name, one usage triple, and the
/// tool-call relation table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserCarry {
    /// Session identity, once seen; header records live in the prefix and
    /// are not re-read on append
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_cwd: String,
    /// Model last announced by a context switch (Codex `turn_context`)
    #[serde(default)]
    pub active_model: String,
    /// Last event id emitted, so the parent chain continues across appends
    #[serde(default)]
    pub last_event_id: String,
    /// Last usage sample seen, for duplicate-notification suppression
    #[serde(default)]
    pub last_token_totals: Option<TokenTotals>,
    /// Cumulative usage seen so far, for delta attribution
    #[serde(default)]
    pub cumulative_tokens: Option<TokenTotals>,
    /// tool_call_id -> event_id of the originating tool_use
    #[serde(default)]
    pub tool_use_events: HashMap<String, String>,
    /// tool_call_id -> tool name, for labeling the matching result
    #[serde(default)]
    pub tool_names: HashMap<String, String>,
}

/// Everything one parse pass produces.
/// `events` holds either the full event sequence or, when `appended` is
/// true, only the suffix past the prior offset.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub session_id: String,
    /// Working directory the agent announced for this session, if any.
    /// Used by the process resolver, never by the index itself.
    pub session_cwd: String,
    pub events: Vec<NormalizedEvent>,
    pub appended: bool,
    /// Malformed records skipped in the parsed region
    pub error_count: u64,
    pub parseable: bool,
    /// Short code describing why the file (or part of it) did not parse
    pub parse_error: String,
    pub resume: ResumeState,
}

impl ParseOutcome {
    pub fn unreadable(reason: String) -> Self {
        Self {
            session_id: String::new(),
            session_cwd: String::new(),
            events: Vec::new(),
            appended: false,
            error_count: 0,
            parseable: false,
            parse_error: reason,
            resume: ResumeState::default(),
        }
    }
}

/// One transcript format.
///
/// Responsibilities:
/// - Claim files by path shape and first-line content
/// - Parse full files or resume from a prior offset
/// - Emit normalized, redacted events
pub trait TraceParser: Send + Sync {
    /// Unique parser ID (e.g. "codex", "claude")
    fn id(&self) -> &'static str;

    /// Agent whose transcripts this parser reads
    fn agent(&self) -> Agent;

    /// Check if a path shape belongs to this parser
    fn matches_path(&self, path: &Path) -> bool;

    /// Check if a file's first line looks like this format
    fn probe_first_line(&self, line: &str) -> bool;

    /// Whether the format supports append-only incremental parsing.
    /// Directory-shaped and single-JSON formats reparse fully.
    fn incremental(&self) -> bool {
        true
    }

    /// Parse the trace. When `prior` is given and the file's prefix is
    /// unchanged, only suffix events are returned (`appended = true`);
    /// otherwise the full sequence is returned.
    fn parse(
        &self,
        path: &Path,
        trace_id: &str,
        prior: Option<&ResumeState>,
    ) -> Result<ParseOutcome>;
}
