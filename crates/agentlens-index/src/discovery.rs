use agentlens_types::{Agent, Config, LogType, SessionLogDirectory, SourceProfile};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::glob::matches_any;

/// One file (or directory-shaped record) discovery turned up.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub profile: String,
    pub agent_hint: Option<Agent>,
    pub declared_log_type: LogType,
}

/// Default include patterns per declared transcript format.
fn include_globs_for(log_type: LogType) -> Vec<String> {
    let patterns: &[&str] = match log_type {
        LogType::Codex | LogType::Claude | LogType::Pi => &["*.jsonl"],
        LogType::Cursor => &["*.txt"],
        LogType::Gemini => &["session-*.json"],
        LogType::Opencode => &["*.json"],
        LogType::Unknown => &["*.jsonl", "*.json", "*.txt"],
    };
    patterns.iter().map(|s| s.to_string()).collect()
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

/// Well-known transcript directories that exist on this machine, used when
/// the configuration names no sources at all.
pub fn default_session_log_directories() -> Vec<SessionLogDirectory> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let known: [(PathBuf, LogType); 6] = [
        (home.join(".codex/sessions"), LogType::Codex),
        (home.join(".claude/projects"), LogType::Claude),
        (home.join(".cursor/projects"), LogType::Cursor),
        (home.join(".gemini/tmp"), LogType::Gemini),
        (home.join(".pi/agent/sessions"), LogType::Pi),
        (
            home.join(".local/share/opencode/storage"),
            LogType::Opencode,
        ),
    ];
    known
        .into_iter()
        .filter(|(path, _)| path.exists())
        .map(|(path, log_type)| SessionLogDirectory::Typed {
            directory: path.to_string_lossy().into_owned(),
            log_type,
        })
        .collect()
}

/// Expand `session_log_directories` entries into synthetic source profiles.
fn synthetic_profiles(config: &Config) -> Vec<(String, SourceProfile, LogType)> {
    config
        .session_log_directories
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let (directory, log_type) = entry.resolve();
            let name = format!("session_logs/{}:{}", log_type.as_str(), i);
            let profile = SourceProfile {
                enabled: true,
                roots: vec![directory],
                include_globs: include_globs_for(log_type),
                exclude_globs: Vec::new(),
                max_depth: 8,
                agent_hint: log_type.agent(),
            };
            (name, profile, log_type)
        })
        .collect()
}

/// Enumerate every candidate transcript under the configured sources.
///
/// The path is the dedupe key; the first profile to find a file wins.
/// Symlinks are followed up to the profile's depth cap. Unreadable
/// directories are logged and skipped without disabling the profile.
pub fn discover(config: &Config) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen: HashMap<PathBuf, usize> = HashMap::new();

    for (name, profile) in config.sources.iter() {
        scan_profile(
            name,
            profile,
            LogType::Unknown,
            &mut candidates,
            &mut seen,
        );
    }
    for (name, profile, log_type) in synthetic_profiles(config) {
        scan_profile(&name, &profile, log_type, &mut candidates, &mut seen);
    }

    hide_shadowed_opencode_placeholders(candidates)
}

fn scan_profile(
    name: &str,
    profile: &SourceProfile,
    declared: LogType,
    candidates: &mut Vec<Candidate>,
    seen: &mut HashMap<PathBuf, usize>,
) {
    if !profile.enabled {
        return;
    }

    for root in &profile.roots {
        let root = expand_tilde(root);
        if !root.exists() {
            continue;
        }

        let walker = WalkDir::new(&root)
            .follow_links(true)
            .max_depth(profile.max_depth.max(1));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(profile = name, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let basename = match path.file_name() {
                Some(n) => n.to_string_lossy().into_owned(),
                None => continue,
            };

            if !profile.include_globs.is_empty()
                && !matches_any(&profile.include_globs, &basename)
            {
                continue;
            }
            if matches_any(&profile.exclude_globs, &basename) {
                continue;
            }
            if !accepts(declared, path, &basename) {
                continue;
            }

            let abs = path.to_path_buf();
            if seen.contains_key(&abs) {
                continue; // first-enumerated profile wins
            }
            seen.insert(abs.clone(), candidates.len());
            candidates.push(Candidate {
                path: abs,
                profile: name.to_string(),
                agent_hint: profile.agent_hint,
                declared_log_type: declared,
            });
        }
    }
}

/// Format-specific file filters that globs alone cannot express.
fn accepts(declared: LogType, path: &Path, basename: &str) -> bool {
    let s = path.to_string_lossy();
    match declared {
        // Gemini project logs are ignored for indexing
        LogType::Gemini => basename != "logs.json",
        // Only the session records are traces; message/part files are
        // constituents the parser loads itself
        LogType::Opencode => s.contains("/session/") || s.contains("/session_diff/"),
        _ => {
            // Generic profiles can still sweep a gemini tree
            !(s.contains("/.gemini/") && basename == "logs.json")
        }
    }
}

/// A `session_diff/<id>.json` placeholder is hidden when a real
/// `session/<scope>/<id>.json` exists for the same id.
fn hide_shadowed_opencode_placeholders(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let real_sessions: HashSet<String> = candidates
        .iter()
        .filter(|c| {
            let s = c.path.to_string_lossy();
            s.contains("/storage/session/")
        })
        .filter_map(|c| c.path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();

    candidates
        .into_iter()
        .filter(|c| {
            let s = c.path.to_string_lossy();
            if !s.contains("/session_diff/") {
                return true;
            }
            let stem = c
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            !real_sessions.contains(&stem)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::Config;
    use std::collections::BTreeMap;

    fn config_with_source(name: &str, profile: SourceProfile) -> Config {
        let mut sources = BTreeMap::new();
        sources.insert(name.to_string(), profile);
        Config {
            sources,
            ..Default::default()
        }
    }

    #[test]
    fn test_include_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "x").unwrap();
        std::fs::write(dir.path().join("b.json"), "x").unwrap();
        std::fs::write(dir.path().join("skip.jsonl"), "x").unwrap();

        let config = config_with_source(
            "test",
            SourceProfile {
                enabled: true,
                roots: vec![dir.path().to_string_lossy().into_owned()],
                include_globs: vec!["*.jsonl".to_string()],
                exclude_globs: vec!["skip*".to_string()],
                max_depth: 3,
                agent_hint: Some(Agent::Codex),
            },
        );

        let found = discover(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("a.jsonl"));
        assert_eq!(found[0].agent_hint, Some(Agent::Codex));
    }

    #[test]
    fn test_disabled_profile_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "x").unwrap();
        let config = config_with_source(
            "off",
            SourceProfile {
                enabled: false,
                roots: vec![dir.path().to_string_lossy().into_owned()],
                ..Default::default()
            },
        );
        assert!(discover(&config).is_empty());
    }

    #[test]
    fn test_session_log_directories_expand() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.jsonl"), "x").unwrap();
        let config = Config {
            session_log_directories: vec![SessionLogDirectory::Typed {
                directory: dir.path().to_string_lossy().into_owned(),
                log_type: LogType::Pi,
            }],
            ..Default::default()
        };

        let found = discover(&config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].declared_log_type, LogType::Pi);
        assert_eq!(found[0].agent_hint, Some(Agent::Pi));
        assert!(found[0].profile.starts_with("session_logs/pi"));
    }

    #[test]
    fn test_first_profile_wins_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "x").unwrap();
        let root = dir.path().to_string_lossy().into_owned();

        let mut sources = BTreeMap::new();
        sources.insert(
            "alpha".to_string(),
            SourceProfile {
                roots: vec![root.clone()],
                include_globs: vec!["*.jsonl".to_string()],
                ..Default::default()
            },
        );
        sources.insert(
            "beta".to_string(),
            SourceProfile {
                roots: vec![root],
                include_globs: vec!["*.jsonl".to_string()],
                ..Default::default()
            },
        );
        let config = Config {
            sources,
            ..Default::default()
        };

        let found = discover(&config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].profile, "alpha"); // BTreeMap order
    }

    #[test]
    fn test_gemini_logs_json_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let chats = dir.path().join("chats");
        std::fs::create_dir_all(&chats).unwrap();
        std::fs::write(chats.join("session-1.json"), "{}").unwrap();
        std::fs::write(dir.path().join("logs.json"), "{}").unwrap();

        let config = Config {
            session_log_directories: vec![SessionLogDirectory::Typed {
                directory: dir.path().to_string_lossy().into_owned(),
                log_type: LogType::Gemini,
            }],
            ..Default::default()
        };
        let found = discover(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("session-1.json"));
    }

    #[test]
    fn test_opencode_placeholder_hidden_by_real_session() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        let session = storage.join("session").join("default");
        let diff = storage.join("session_diff");
        std::fs::create_dir_all(&session).unwrap();
        std::fs::create_dir_all(&diff).unwrap();
        std::fs::write(session.join("ses_1.json"), "{}").unwrap();
        std::fs::write(diff.join("ses_1.json"), "{}").unwrap();
        std::fs::write(diff.join("ses_2.json"), "{}").unwrap();

        let config = Config {
            session_log_directories: vec![SessionLogDirectory::Typed {
                directory: storage.to_string_lossy().into_owned(),
                log_type: LogType::Opencode,
            }],
            ..Default::default()
        };
        let found = discover(&config);
        let paths: Vec<String> = found
            .iter()
            .map(|c| c.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(found.len(), 2, "paths: {:?}", paths);
        assert!(paths.iter().any(|p| p.contains("/session/")));
        assert!(
            paths
                .iter()
                .any(|p| p.contains("/session_diff/") && p.ends_with("ses_2.json"))
        );
    }
}
