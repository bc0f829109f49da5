use sha2::{Digest, Sha256};
use std::path::Path;

/// Maximum length of an event preview line
pub const PREVIEW_MAX_CHARS: usize = 200;

/// Stable trace id: truncated hex of sha256 over the absolute path.
pub fn trace_id_for_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Collapse text to a single line capped at `max` chars.
pub fn one_line_preview(text: &str, max: usize) -> String {
    let collapsed: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", truncated)
}
