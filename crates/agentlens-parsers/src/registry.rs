use agentlens_types::{Agent, LogType};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::claude::ClaudeParser;
use crate::codex::CodexParser;
use crate::cursor::CursorParser;
use crate::gemini::GeminiParser;
use crate::opencode::OpencodeParser;
use crate::pi::PiParser;
use crate::redact::Redactor;
use crate::traits::TraceParser;

/// Fixed set of format parsers with the selection ladder:
/// declared log type, then agent hint, then path shape, then a
/// first-line content probe.
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn TraceParser>>,
}

impl ParserRegistry {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        let parsers: Vec<Arc<dyn TraceParser>> = vec![
            Arc::new(CodexParser::new(redactor.clone())),
            Arc::new(ClaudeParser::new(redactor.clone())),
            Arc::new(CursorParser::new(redactor.clone())),
            Arc::new(GeminiParser::new(redactor.clone())),
            Arc::new(PiParser::new(redactor.clone())),
            Arc::new(OpencodeParser::new(redactor)),
        ];
        Self { parsers }
    }

    pub fn all(&self) -> &[Arc<dyn TraceParser>] {
        &self.parsers
    }

    pub fn by_agent(&self, agent: Agent) -> Option<Arc<dyn TraceParser>> {
        self.parsers.iter().find(|p| p.agent() == agent).cloned()
    }

    pub fn by_log_type(&self, log_type: LogType) -> Option<Arc<dyn TraceParser>> {
        log_type.agent().and_then(|agent| self.by_agent(agent))
    }

    /// Pick the parser for a file. Returns None when nothing claims it.
    pub fn select(
        &self,
        path: &Path,
        declared: LogType,
        hint: Option<Agent>,
    ) -> Option<Arc<dyn TraceParser>> {
        if let Some(parser) = self.by_log_type(declared) {
            return Some(parser);
        }
        if let Some(parser) = hint.and_then(|agent| self.by_agent(agent)) {
            return Some(parser);
        }
        if let Some(parser) = self.parsers.iter().find(|p| p.matches_path(path)) {
            return Some(parser.clone());
        }
        // Last resort: look at the first line
        let first_line = read_first_line(path)?;
        self.parsers
            .iter()
            .find(|p| p.probe_first_line(&first_line))
            .cloned()
    }
}

fn read_first_line(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry() -> ParserRegistry {
        ParserRegistry::new(Arc::new(Redactor::standard()))
    }

    #[test]
    fn test_declared_log_type_wins() {
        let registry = registry();
        let parser = registry
            .select(Path::new("/weird/place/x.jsonl"), LogType::Pi, None)
            .unwrap();
        assert_eq!(parser.id(), "pi");
    }

    #[test]
    fn test_agent_hint_when_type_unknown() {
        let registry = registry();
        let parser = registry
            .select(
                Path::new("/weird/place/x.jsonl"),
                LogType::Unknown,
                Some(Agent::Gemini),
            )
            .unwrap();
        assert_eq!(parser.id(), "gemini");
    }

    #[test]
    fn test_path_shape_selection() {
        let registry = registry();
        let cases = [
            ("/home/rob/.codex/sessions/2026/a.jsonl", "codex"),
            ("/home/rob/.claude/projects/-x-y/b.jsonl", "claude"),
            (
                "/home/rob/.cursor/projects/app/agent-transcripts/s.txt",
                "cursor",
            ),
            ("/home/rob/.gemini/tmp/ffaa/chats/session-1.json", "gemini"),
            ("/home/rob/.pi/agent/sessions/c.jsonl", "pi"),
            (
                "/home/rob/.local/share/opencode/storage/session/default/ses_1.json",
                "opencode",
            ),
        ];
        for (path, expected) in cases {
            let parser = registry
                .select(Path::new(path), LogType::Unknown, None)
                .unwrap_or_else(|| panic!("no parser for {}", path));
            assert_eq!(parser.id(), expected, "path {}", path);
        }
    }

    #[test]
    fn test_first_line_probe_fallback() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"type":"session_meta","payload":{{"id":"s1","cwd":"/tmp"}}}}"#
        )
        .unwrap();
        f.flush().unwrap();

        let registry = registry();
        let parser = registry
            .select(f.path(), LogType::Unknown, None)
            .expect("probe should claim the file");
        assert_eq!(parser.id(), "codex");
    }

    #[test]
    fn test_unclaimed_file_returns_none() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "just some text").unwrap();
        f.flush().unwrap();

        let registry = registry();
        assert!(registry.select(f.path(), LogType::Unknown, None).is_none());
    }
}
