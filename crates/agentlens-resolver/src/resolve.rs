use agentlens_types::{Agent, TraceSummary};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use crate::project_key::*;
use crate::system::read_tail;
use crate::Resolver;

const DEBUG_LOG_TAIL_BYTES: u64 = 64 * 1024;

static CODEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bcodex\b").unwrap());
static CLAUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bclaude\b").unwrap());
static CURSOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bcursor\b").unwrap());
static GEMINI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bgemini\b").unwrap());
static PI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bpi\b").unwrap());
static OPENCODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bopencode\b").unwrap());

static PID_LOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Acquired PID lock \(PID (\d+)\)").unwrap());
static TMP_PID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.claude\.json\.tmp\.(\d+)\.").unwrap());

pub(crate) fn agent_regex(agent: Agent) -> &'static Regex {
    match agent {
        Agent::Codex => &CODEX_RE,
        Agent::Claude => &CLAUDE_RE,
        Agent::Cursor => &CURSOR_RE,
        Agent::Gemini => &GEMINI_RE,
        Agent::Pi => &PI_RE,
        Agent::Opencode => &OPENCODE_RE,
    }
}

/// The long-running `opencode … serve …` daemon opens every session file
/// and must never be targeted.
fn is_opencode_serve(args: &str) -> bool {
    let lowered = args.to_lowercase();
    lowered.contains("opencode") && lowered.split_whitespace().any(|w| w == "serve")
}

impl Resolver {
    /// Resolve the live OS processes owning a trace. Stages run in order;
    /// the first stage with any survivors wins, then disambiguation
    /// either narrows the set or abstains with an empty result.
    pub fn resolve_pids(&self, summary: &TraceSummary, session_cwd: &str) -> Vec<i32> {
        let stages: [fn(&Resolver, &TraceSummary, &str) -> Vec<i32>; 6] = [
            Resolver::stage_open_file_owners,
            Resolver::stage_claude_debug_log,
            Resolver::stage_project_cwd,
            Resolver::stage_open_path_session_id,
            Resolver::stage_gemini_project_log,
            Resolver::stage_session_id_in_args,
        ];

        for stage in stages {
            let found = stage(self, summary, session_cwd);
            if !found.is_empty() {
                tracing::debug!(trace = %summary.id, pids = ?found, "resolver stage matched");
                return self.disambiguate(found, summary);
            }
        }
        Vec::new()
    }

    /// Candidate agent processes from the process table: right command,
    /// right user, not us, and never the OpenCode serve daemon.
    fn agent_candidates(&self, summary: &TraceSummary) -> Vec<(i32, String)> {
        let identity = self.processes.identity();
        let re = agent_regex(summary.agent);
        self.processes
            .list()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.pid != identity.own_pid)
            .filter(|p| p.user == identity.username || p.user == identity.uid.to_string())
            .filter(|p| re.is_match(&p.args.to_lowercase()))
            .filter(|p| !is_opencode_serve(&p.args))
            .map(|p| (p.pid, p.args))
            .collect()
    }

    /// Stage 1: who holds the transcript open right now.
    fn stage_open_file_owners(&self, summary: &TraceSummary, _cwd: &str) -> Vec<i32> {
        let owners = self
            .files
            .owners_of(Path::new(&summary.path))
            .unwrap_or_default();
        if owners.is_empty() {
            return Vec::new();
        }

        let identity = self.processes.identity();
        let uid_str = identity.uid.to_string();
        let mut survivors: Vec<_> = owners
            .into_iter()
            .filter(|o| o.user == identity.username || o.user == uid_str)
            .filter(|o| o.pid != identity.own_pid)
            .collect();
        if survivors.is_empty() {
            return Vec::new();
        }

        let re = agent_regex(summary.agent);
        let agent_matching: Vec<_> = survivors
            .iter()
            .filter(|o| re.is_match(&o.command.to_lowercase()))
            .cloned()
            .collect();
        if !agent_matching.is_empty() {
            survivors = agent_matching;
        }

        // Command names from the open-file table are truncated; args come
        // from the process table for the serve-daemon and session-id tests
        let args_by_pid: HashMap<i32, String> = self
            .processes
            .list()
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.pid, p.args))
            .collect();

        if summary.agent == Agent::Opencode {
            survivors.retain(|o| {
                args_by_pid
                    .get(&o.pid)
                    .map(|args| !is_opencode_serve(args))
                    .unwrap_or(true)
            });
        }

        if !summary.session_id.is_empty() {
            let with_session: Vec<_> = survivors
                .iter()
                .filter(|o| {
                    args_by_pid
                        .get(&o.pid)
                        .map(|args| args.contains(&summary.session_id))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if !with_session.is_empty() {
                survivors = with_session;
            }
        }

        survivors.into_iter().map(|o| o.pid).collect()
    }

    /// Stage 2: the pid Claude wrote into its own debug log.
    fn stage_claude_debug_log(&self, summary: &TraceSummary, _cwd: &str) -> Vec<i32> {
        if summary.agent != Agent::Claude || summary.session_id.is_empty() {
            return Vec::new();
        }
        let log_path = self
            .home
            .join(".claude/debug")
            .join(format!("{}.txt", summary.session_id));
        let Ok(tail) = read_tail(&log_path, DEBUG_LOG_TAIL_BYTES) else {
            return Vec::new();
        };

        // Most recent pid token of either shape wins
        let mut last: Option<(usize, i32)> = None;
        for re in [&*PID_LOCK_RE, &*TMP_PID_RE] {
            for captures in re.captures_iter(&tail) {
                if let (Some(whole), Some(pid)) = (captures.get(0), captures.get(1)) {
                    if let Ok(pid) = pid.as_str().parse::<i32>() {
                        if last.map(|(pos, _)| whole.start() > pos).unwrap_or(true) {
                            last = Some((whole.start(), pid));
                        }
                    }
                }
            }
        }
        let Some((_, pid)) = last else {
            return Vec::new();
        };

        // Validate: alive, ours, runs claude, right project
        if !self.processes.is_alive(pid) {
            return Vec::new();
        }
        let identity = self.processes.identity();
        let process = self
            .processes
            .list()
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.pid == pid);
        let Some(process) = process else {
            return Vec::new();
        };
        if process.user != identity.username && process.user != identity.uid.to_string() {
            return Vec::new();
        }
        if !CLAUDE_RE.is_match(&process.args.to_lowercase()) {
            return Vec::new();
        }
        if let Some(project_key) = claude_key_of_trace_path(&summary.path) {
            match self.files.cwd_of(pid) {
                Ok(Some(cwd)) if claude_key_of_cwd(&cwd) == project_key => {}
                _ => return Vec::new(),
            }
        }
        vec![pid]
    }

    /// Stage 3: agent processes whose cwd normalizes to the trace's
    /// project key.
    fn stage_project_cwd(&self, summary: &TraceSummary, session_cwd: &str) -> Vec<i32> {
        let candidates = self.agent_candidates(summary);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut matched = Vec::new();
        for (pid, _args) in &candidates {
            let Ok(Some(cwd)) = self.files.cwd_of(*pid) else {
                continue;
            };
            let hit = match summary.agent {
                Agent::Claude => claude_key_of_trace_path(&summary.path)
                    .map(|key| claude_key_of_cwd(&cwd) == key)
                    .unwrap_or(false),
                Agent::Cursor => cursor_key_of_trace_path(&summary.path)
                    .map(|key| cursor_key_of_cwd(&cwd) == key)
                    .unwrap_or(false),
                Agent::Gemini => gemini_hash_of_trace_path(&summary.path)
                    .map(|key| gemini_cwd_matches(&key, &cwd))
                    .unwrap_or(false),
                _ => {
                    !session_cwd.is_empty()
                        && claude_key_of_cwd(&cwd) == claude_key_of_cwd(session_cwd)
                }
            };
            if hit {
                matched.push(*pid);
            }
        }
        matched
    }

    /// Stage 4: session id visible in a candidate's open paths
    /// (Cursor store.db) or log tail (OpenCode).
    fn stage_open_path_session_id(&self, summary: &TraceSummary, _cwd: &str) -> Vec<i32> {
        if summary.session_id.is_empty() {
            return Vec::new();
        }
        match summary.agent {
            Agent::Cursor => {
                let needle = format!("/{}/store.db", summary.session_id);
                self.agent_candidates(summary)
                    .into_iter()
                    .filter(|(pid, _)| {
                        self.files
                            .open_paths(*pid)
                            .unwrap_or_default()
                            .iter()
                            .any(|p| p.contains("chats/") && p.contains(&needle))
                    })
                    .map(|(pid, _)| pid)
                    .collect()
            }
            Agent::Opencode => {
                let needle = format!("sessionID={}", summary.session_id);
                self.agent_candidates(summary)
                    .into_iter()
                    .filter(|(pid, _)| {
                        self.files
                            .open_paths(*pid)
                            .unwrap_or_default()
                            .iter()
                            .filter(|p| p.contains("/opencode/log/") && p.ends_with(".log"))
                            .any(|p| {
                                read_tail(Path::new(p), DEBUG_LOG_TAIL_BYTES)
                                    .map(|tail| tail.contains(&needle))
                                    .unwrap_or(false)
                            })
                    })
                    .map(|(pid, _)| pid)
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Stage 5: the Gemini project log names the session.
    fn stage_gemini_project_log(&self, summary: &TraceSummary, _cwd: &str) -> Vec<i32> {
        if summary.agent != Agent::Gemini || summary.session_id.is_empty() {
            return Vec::new();
        }
        let Some(project_hash) = gemini_hash_of_trace_path(&summary.path) else {
            return Vec::new();
        };
        let log_path = self
            .home
            .join(".gemini/tmp")
            .join(&project_hash)
            .join("logs.json");
        let Ok(contents) = std::fs::read_to_string(&log_path) else {
            return Vec::new();
        };
        if !contents.contains(&summary.session_id) {
            return Vec::new();
        }

        self.agent_candidates(summary)
            .into_iter()
            .filter(|(pid, _)| {
                matches!(
                    self.files.cwd_of(*pid),
                    Ok(Some(cwd)) if gemini_cwd_matches(&project_hash, &cwd)
                )
            })
            .map(|(pid, _)| pid)
            .collect()
    }

    /// Stage 6: the session id appears verbatim in a candidate's args.
    fn stage_session_id_in_args(&self, summary: &TraceSummary, _cwd: &str) -> Vec<i32> {
        if summary.session_id.is_empty() {
            return Vec::new();
        }
        self.agent_candidates(summary)
            .into_iter()
            .filter(|(_, args)| args.contains(&summary.session_id))
            .map(|(pid, _)| pid)
            .collect()
    }

    /// Narrow a multi-pid result, abstaining when the evidence is split.
    fn disambiguate(&self, pids: Vec<i32>, summary: &TraceSummary) -> Vec<i32> {
        if pids.len() <= 1 {
            return pids;
        }

        if summary.agent == Agent::Gemini {
            return self.disambiguate_gemini(pids, summary);
        }

        // Same terminal: keep the whole group. Split across terminals:
        // abstain rather than guess
        let ttys: Vec<Option<String>> = pids
            .iter()
            .map(|pid| self.processes.tty_of(*pid).ok().flatten())
            .collect();
        let first = &ttys[0];
        if first.is_some() && ttys.iter().all(|t| t == first) {
            pids
        } else {
            Vec::new()
        }
    }

    /// Gemini ties: group candidates by tty, anchor each group at its
    /// earliest-started pid, and pick the group closest in time to the
    /// session's start. Exact ties abstain.
    fn disambiguate_gemini(&self, pids: Vec<i32>, summary: &TraceSummary) -> Vec<i32> {
        let anchor = summary
            .first_event_ts
            .or(summary.last_event_ts)
            .unwrap_or(summary.mtime_ms);

        let mut groups: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for pid in &pids {
            let tty = self
                .processes
                .tty_of(*pid)
                .ok()
                .flatten()
                .unwrap_or_else(|| format!("?{}", pid));
            groups.entry(tty).or_default().push(*pid);
        }

        let mut scored: Vec<(i64, Vec<i32>)> = Vec::new();
        for pids in groups.values() {
            let earliest = pids
                .iter()
                .filter_map(|pid| self.processes.start_time_of(*pid).ok().flatten())
                .min();
            let Some(earliest) = earliest else {
                continue;
            };
            scored.push(((earliest - anchor).abs(), pids.clone()));
        }
        scored.sort_by_key(|(dist, _)| *dist);

        match scored.as_slice() {
            [] => Vec::new(),
            [(_, only)] => only.clone(),
            [(d1, first), (d2, _), ..] if d1 < d2 => first.clone(),
            // Two groups at the same distance: abstain
            _ => Vec::new(),
        }
    }
}
