use sha2::{Digest, Sha256};

// Project keys tie a process's cwd to the directory a trace was recorded
// for. Each agent encodes the project differently on disk, so each gets
// its own canonical form.

/// Claude flattens the project cwd into one path component:
/// `/Users/rob/My_App` -> `-Users-rob-My-App`. Every non-alphanumeric
/// character becomes a dash, one for one.
pub fn claude_key_of_cwd(cwd: &str) -> String {
    let mut path = cwd.trim().to_string();
    if !path.starts_with('/') {
        path = format!("/{}", path);
    }
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// The project component embedded in a Claude trace path, i.e. the
/// directory right after `/.claude/projects/`.
pub fn claude_key_of_trace_path(trace_path: &str) -> Option<String> {
    let marker = "/.claude/projects/";
    let idx = trace_path.find(marker)?;
    let rest = &trace_path[idx + marker.len()..];
    let component = rest.split('/').next()?;
    if component.is_empty() {
        None
    } else {
        Some(component.to_string())
    }
}

/// Cursor keys are lowercased with runs of non-alphanumerics collapsed
/// to a single dash and outer slashes trimmed.
pub fn cursor_key_of_cwd(cwd: &str) -> String {
    collapse_non_alnum(cwd.trim().trim_matches('/'))
}

/// The directory after `/.cursor/projects/`, lowercased.
pub fn cursor_key_of_trace_path(trace_path: &str) -> Option<String> {
    let marker = "/.cursor/projects/";
    let idx = trace_path.find(marker)?;
    let rest = &trace_path[idx + marker.len()..];
    let component = rest.split('/').next()?;
    if component.is_empty() {
        None
    } else {
        Some(component.to_lowercase())
    }
}

/// The 64-hex project hash embedded in a Gemini trace path, i.e. the
/// directory after `/.gemini/tmp/`.
pub fn gemini_hash_of_trace_path(trace_path: &str) -> Option<String> {
    let marker = "/.gemini/tmp/";
    let idx = trace_path.find(marker)?;
    let rest = &trace_path[idx + marker.len()..];
    let component = rest.split('/').next()?;
    if component.is_empty() {
        None
    } else {
        Some(component.to_string())
    }
}

/// Whether a cwd hashes (or slugs) to a Gemini project key.
/// The hash covers the trimmed cwd, and also its slash-stripped
/// normalization; slug-style keys match the collapsed cwd or its
/// basename.
pub fn gemini_cwd_matches(project_key: &str, cwd: &str) -> bool {
    let trimmed = cwd.trim();
    if is_hex64(project_key) {
        if sha256_hex(trimmed) == project_key {
            return true;
        }
        let stripped = trimmed.trim_matches('/');
        return sha256_hex(stripped) == project_key;
    }
    // Slug-style key
    let slug = collapse_non_alnum(trimmed.trim_matches('/'));
    if slug == project_key {
        return true;
    }
    let basename = trimmed.rsplit('/').next().unwrap_or(trimmed);
    collapse_non_alnum(basename) == project_key
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn collapse_non_alnum(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;
    for c in input.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_cwd_key() {
        assert_eq!(
            claude_key_of_cwd("/Users/rob/Dropbox/2026_sakana/agentlens"),
            "-Users-rob-Dropbox-2026-sakana-agentlens"
        );
    }

    #[test]
    fn test_claude_trace_path_key() {
        let path = "/Users/rob/.claude/projects/-Users-rob-Dropbox-2026-sakana-agentlens/2356bd53.jsonl";
        assert_eq!(
            claude_key_of_trace_path(path).unwrap(),
            "-Users-rob-Dropbox-2026-sakana-agentlens"
        );
        assert!(claude_key_of_trace_path("/nothing/here.jsonl").is_none());
    }

    #[test]
    fn test_claude_keys_agree() {
        let trace = "/Users/rob/.claude/projects/-Users-rob-Dropbox-2026-sakana-agentlens/s.jsonl";
        let key = claude_key_of_trace_path(trace).unwrap();
        assert_eq!(
            claude_key_of_cwd("/Users/rob/Dropbox/2026_sakana/agentlens"),
            key
        );
    }

    #[test]
    fn test_cursor_keys() {
        assert_eq!(cursor_key_of_cwd("/Work/My App/"), "work-my-app");
        let trace = "/home/u/.cursor/projects/Work-App/agent-transcripts/s.txt";
        assert_eq!(cursor_key_of_trace_path(trace).unwrap(), "work-app");
    }

    #[test]
    fn test_gemini_hash_match() {
        let cwd = "/home/rob/projects/demo";
        let hash = sha256_hex(cwd);
        assert!(gemini_cwd_matches(&hash, cwd));
        assert!(gemini_cwd_matches(&hash, &format!("  {}  ", cwd)));
        assert!(!gemini_cwd_matches(&hash, "/somewhere/else"));
    }

    #[test]
    fn test_gemini_slash_stripped_hash() {
        let cwd = "/home/rob/projects/demo";
        let stripped_hash = sha256_hex("home/rob/projects/demo");
        assert!(gemini_cwd_matches(&stripped_hash, cwd));
    }

    #[test]
    fn test_gemini_slug_match() {
        assert!(gemini_cwd_matches("demo", "/home/rob/projects/demo"));
        assert!(gemini_cwd_matches(
            "home-rob-projects-demo",
            "/home/rob/projects/demo"
        ));
        assert!(!gemini_cwd_matches("other", "/home/rob/projects/demo"));
    }
}
