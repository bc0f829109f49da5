use sha2::{Digest, Sha256};
use std::path::Path;

use crate::traits::ResumeState;
use crate::Result;

/// One physical line of a JSONL transcript.
#[derive(Debug)]
pub struct JsonlLine {
    /// Byte offset of the line start
    pub start: u64,
    /// Byte offset just past the line (including the newline when present)
    pub end: u64,
    pub text: String,
    /// False for a trailing segment with no newline yet (mid-append)
    pub terminated: bool,
}

/// Lines to parse this pass, plus how they relate to the prior pass.
#[derive(Debug)]
pub struct JsonlChunk {
    pub lines: Vec<JsonlLine>,
    /// True when `lines` is the suffix past a verified unchanged prefix
    pub appended: bool,
    /// Total bytes currently in the file
    pub file_len: u64,
    bytes: Vec<u8>,
}

impl JsonlChunk {
    /// Hex sha256 over the file's first `offset` bytes.
    pub fn prefix_hash(&self, offset: u64) -> String {
        hash_prefix(&self.bytes, offset)
    }
}

fn hash_prefix(bytes: &[u8], offset: u64) -> String {
    let upto = (offset as usize).min(bytes.len());
    let mut hasher = Sha256::new();
    hasher.update(&bytes[..upto]);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Read a JSONL file, resuming past the prior offset when the prefix is
/// byte-identical to the previous read. A changed or shrunk prefix falls
/// back to the full file.
pub fn read_jsonl(path: &Path, prior: Option<&ResumeState>) -> Result<JsonlChunk> {
    let bytes = std::fs::read(path)?;
    let file_len = bytes.len() as u64;

    let (start, appended) = match prior {
        Some(state)
            if state.offset > 0
                && state.offset <= file_len
                && hash_prefix(&bytes, state.offset) == state.prefix_sha256 =>
        {
            (state.offset as usize, true)
        }
        _ => (0, false),
    };

    let mut lines = Vec::new();
    let mut cursor = start;
    while cursor < bytes.len() {
        let rest = &bytes[cursor..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let text = String::from_utf8_lossy(&rest[..pos]).into_owned();
                lines.push(JsonlLine {
                    start: cursor as u64,
                    end: (cursor + pos + 1) as u64,
                    text,
                    terminated: true,
                });
                cursor += pos + 1;
            }
            None => {
                let text = String::from_utf8_lossy(rest).into_owned();
                lines.push(JsonlLine {
                    start: cursor as u64,
                    end: bytes.len() as u64,
                    text,
                    terminated: false,
                });
                break;
            }
        }
    }

    Ok(JsonlChunk {
        lines,
        appended,
        file_len,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_full_read_splits_lines() {
        let f = write_temp(b"{\"a\":1}\n{\"b\":2}\n");
        let chunk = read_jsonl(f.path(), None).unwrap();
        assert!(!chunk.appended);
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.lines[0].start, 0);
        assert_eq!(chunk.lines[0].end, 8);
        assert!(chunk.lines[0].terminated);
    }

    #[test]
    fn test_trailing_partial_line_flagged() {
        let f = write_temp(b"{\"a\":1}\n{\"b\":");
        let chunk = read_jsonl(f.path(), None).unwrap();
        assert_eq!(chunk.lines.len(), 2);
        assert!(chunk.lines[0].terminated);
        assert!(!chunk.lines[1].terminated);
    }

    #[test]
    fn test_resume_with_matching_prefix() {
        let f = write_temp(b"{\"a\":1}\n{\"b\":2}\n");
        let full = read_jsonl(f.path(), None).unwrap();
        let state = ResumeState {
            offset: 8,
            prefix_sha256: full.prefix_hash(8),
            event_count: 1,
            carry: Default::default(),
        };
        let chunk = read_jsonl(f.path(), Some(&state)).unwrap();
        assert!(chunk.appended);
        assert_eq!(chunk.lines.len(), 1);
        assert_eq!(chunk.lines[0].text, "{\"b\":2}");
    }

    #[test]
    fn test_rewritten_prefix_forces_full_read() {
        let f = write_temp(b"{\"a\":9}\n{\"b\":2}\n");
        let state = ResumeState {
            offset: 8,
            prefix_sha256: "not-the-right-hash".to_string(),
            event_count: 1,
            carry: Default::default(),
        };
        let chunk = read_jsonl(f.path(), Some(&state)).unwrap();
        assert!(!chunk.appended);
        assert_eq!(chunk.lines.len(), 2);
    }
}
