mod actions;
mod error;
mod project_key;
mod resolve;
mod system;
mod tmux;

pub use actions::{
    InputReport, InputStatus, OpenReport, OpenStatus, StopReport, StopStatus,
    STOP_FORCE_WAIT_MS, STOP_SIGNAL_WAIT_MS, STOP_WAIT_POLL_MS,
};
pub use error::{Error, Result};
pub use project_key::{
    claude_key_of_cwd, claude_key_of_trace_path, cursor_key_of_cwd, cursor_key_of_trace_path,
    gemini_cwd_matches, gemini_hash_of_trace_path, sha256_hex,
};
pub use system::{
    Identity, LsofOpenFiles, OpenFileOwner, OpenFiles, ProcessInfo, ProcessTable,
    PsProcessTable, Signal,
};
pub use tmux::{
    select_preferred, ActivateHook, GhosttyActivate, TmuxCli, TmuxClient, TmuxControl, TmuxPane,
};

use std::path::PathBuf;

/// Session-to-process resolver with pluggable system access.
///
/// Invoked only on stop/open/input requests, never from the refresh loop.
/// All methods block on subprocess IO; callers on an async runtime wrap
/// them in a blocking task.
pub struct Resolver {
    pub(crate) processes: Box<dyn ProcessTable>,
    pub(crate) files: Box<dyn OpenFiles>,
    pub(crate) tmux: Box<dyn TmuxControl>,
    pub(crate) activate: Box<dyn ActivateHook>,
    pub(crate) home: PathBuf,
}

impl Resolver {
    pub fn new(
        processes: Box<dyn ProcessTable>,
        files: Box<dyn OpenFiles>,
        tmux: Box<dyn TmuxControl>,
        activate: Box<dyn ActivateHook>,
        home: PathBuf,
    ) -> Self {
        Self {
            processes,
            files,
            tmux,
            activate,
            home,
        }
    }

    /// Resolver wired to the host system (`ps`, `lsof`, `tmux`, Ghostty).
    pub fn system() -> Self {
        let uid = PsProcessTable.identity().uid;
        Self::new(
            Box::new(PsProcessTable),
            Box::new(LsofOpenFiles),
            Box::new(TmuxCli::new(uid)),
            Box::new(GhosttyActivate),
            dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    pub struct FakeProcessTable {
        pub identity: Identity,
        pub processes: Vec<ProcessInfo>,
        pub ttys: HashMap<i32, String>,
        pub start_times: HashMap<i32, i64>,
        pub alive: Mutex<Vec<i32>>,
        pub signals: Mutex<Vec<(i32, Signal)>>,
        /// Pids that die when signalled
        pub obedient: bool,
    }

    impl FakeProcessTable {
        pub fn new(processes: Vec<ProcessInfo>) -> Self {
            let alive = processes.iter().map(|p| p.pid).collect();
            Self {
                identity: Identity {
                    username: "rob".to_string(),
                    uid: 501,
                    own_pid: 1000,
                },
                processes,
                ttys: HashMap::new(),
                start_times: HashMap::new(),
                alive: Mutex::new(alive),
                signals: Mutex::new(Vec::new()),
                obedient: true,
            }
        }
    }

    impl ProcessTable for FakeProcessTable {
        fn identity(&self) -> Identity {
            self.identity.clone()
        }

        fn list(&self) -> Result<Vec<ProcessInfo>> {
            Ok(self.processes.clone())
        }

        fn tty_of(&self, pid: i32) -> Result<Option<String>> {
            Ok(self.ttys.get(&pid).cloned())
        }

        fn start_time_of(&self, pid: i32) -> Result<Option<i64>> {
            Ok(self.start_times.get(&pid).copied())
        }

        fn is_alive(&self, pid: i32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        fn signal(&self, pid: i32, signal: Signal) -> Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            if self.obedient {
                self.alive.lock().unwrap().retain(|p| *p != pid);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeOpenFiles {
        pub owners: Vec<OpenFileOwner>,
        pub cwds: HashMap<i32, String>,
        pub open_paths: HashMap<i32, Vec<String>>,
    }

    impl OpenFiles for FakeOpenFiles {
        fn owners_of(&self, _path: &Path) -> Result<Vec<OpenFileOwner>> {
            Ok(self.owners.clone())
        }

        fn cwd_of(&self, pid: i32) -> Result<Option<String>> {
            Ok(self.cwds.get(&pid).cloned())
        }

        fn open_paths(&self, pid: i32) -> Result<Vec<String>> {
            Ok(self.open_paths.get(&pid).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    pub struct FakeTmux {
        pub panes: Vec<TmuxPane>,
        pub clients: Vec<TmuxClient>,
        pub commands: Mutex<Vec<String>>,
    }

    impl TmuxControl for FakeTmux {
        fn panes(&self) -> Result<Vec<TmuxPane>> {
            Ok(self.panes.clone())
        }

        fn clients(&self, _socket: &Path) -> Result<Vec<TmuxClient>> {
            Ok(self.clients.clone())
        }

        fn select_window(&self, _socket: &Path, session: &str, window: &str) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("select-window {}:{}", session, window));
            Ok(())
        }

        fn select_pane(&self, _socket: &Path, target: &str) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("select-pane {}", target));
            Ok(())
        }

        fn switch_client(&self, _socket: &Path, client_tty: &str, session: &str) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("switch-client {} {}", client_tty, session));
            Ok(())
        }

        fn send_keys(&self, _socket: &Path, target: &str, keys: &str, literal: bool) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("send-keys {} {:?} literal={}", target, keys, literal));
            Ok(())
        }
    }

    pub struct NoopActivate;

    impl ActivateHook for NoopActivate {
        fn activate(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use agentlens_types::{Agent, TraceSummary};
    use std::path::PathBuf;

    fn summary(agent: Agent, path: &str, session_id: &str) -> TraceSummary {
        let mut s = TraceSummary::placeholder(
            "t1".to_string(),
            path.to_string(),
            "p".to_string(),
            agent.as_str().to_string(),
            agent,
        );
        s.session_id = session_id.to_string();
        s
    }

    fn resolver(processes: FakeProcessTable, files: FakeOpenFiles) -> Resolver {
        Resolver::new(
            Box::new(processes),
            Box::new(files),
            Box::new(FakeTmux::default()),
            Box::new(NoopActivate),
            PathBuf::from("/nonexistent-home"),
        )
    }

    #[test]
    fn test_claude_project_cwd_resolution() {
        // Two claude-looking processes; only one has the project cwd
        let processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 81230,
                user: "rob".to_string(),
                args: "claude --dangerously-skip-permissions".to_string(),
            },
            ProcessInfo {
                pid: 27376,
                user: "rob".to_string(),
                args: "/Applications/Claude.app/Contents/MacOS/Claude".to_string(),
            },
        ]);
        let mut files = FakeOpenFiles::default();
        files.cwds.insert(
            81230,
            "/Users/rob/Dropbox/2026_sakana/agentlens".to_string(),
        );
        files.cwds.insert(27376, "/Applications/Claude.app".to_string());

        let resolver = resolver(processes, files);
        let summary = summary(
            Agent::Claude,
            "/Users/rob/.claude/projects/-Users-rob-Dropbox-2026-sakana-agentlens/2356bd53-2142-4bad-a14f-a04e50069f51.jsonl",
            "2356bd53-2142-4bad-a14f-a04e50069f51",
        );
        assert_eq!(resolver.resolve_pids(&summary, ""), vec![81230]);
    }

    #[test]
    fn test_never_targets_own_pid() {
        let mut processes = FakeProcessTable::new(vec![ProcessInfo {
            pid: 1000, // the daemon itself
            user: "rob".to_string(),
            args: "claude something".to_string(),
        }]);
        processes.identity.own_pid = 1000;
        let mut files = FakeOpenFiles::default();
        files.owners.push(OpenFileOwner {
            pid: 1000,
            command: "claude".to_string(),
            user: "rob".to_string(),
        });
        files.cwds.insert(1000, "/Users/rob/x".to_string());

        let resolver = resolver(processes, files);
        let summary = summary(
            Agent::Claude,
            "/Users/rob/.claude/projects/-Users-rob-x/s.jsonl",
            "sid",
        );
        assert!(resolver.resolve_pids(&summary, "").is_empty());
    }

    #[test]
    fn test_open_file_owner_stage_wins() {
        let processes = FakeProcessTable::new(vec![ProcessInfo {
            pid: 42,
            user: "rob".to_string(),
            args: "codex exec --session sess-9".to_string(),
        }]);
        let mut files = FakeOpenFiles::default();
        files.owners.push(OpenFileOwner {
            pid: 42,
            command: "codex".to_string(),
            user: "rob".to_string(),
        });

        let resolver = resolver(processes, files);
        let summary = summary(
            Agent::Codex,
            "/Users/rob/.codex/sessions/2026/rollout.jsonl",
            "sess-9",
        );
        assert_eq!(resolver.resolve_pids(&summary, ""), vec![42]);
    }

    #[test]
    fn test_other_user_owner_excluded() {
        let processes = FakeProcessTable::new(vec![]);
        let mut files = FakeOpenFiles::default();
        files.owners.push(OpenFileOwner {
            pid: 9,
            command: "codex".to_string(),
            user: "mallory".to_string(),
        });

        let resolver = resolver(processes, files);
        let summary = summary(Agent::Codex, "/x/.codex/sessions/a.jsonl", "");
        assert!(resolver.resolve_pids(&summary, "").is_empty());
    }

    #[test]
    fn test_opencode_serve_daemon_excluded() {
        let processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 7,
                user: "rob".to_string(),
                args: "opencode serve --port 1".to_string(),
            },
            ProcessInfo {
                pid: 8,
                user: "rob".to_string(),
                args: "opencode run".to_string(),
            },
        ]);
        let mut files = FakeOpenFiles::default();
        files.owners.push(OpenFileOwner {
            pid: 7,
            command: "opencode".to_string(),
            user: "rob".to_string(),
        });
        files.owners.push(OpenFileOwner {
            pid: 8,
            command: "opencode".to_string(),
            user: "rob".to_string(),
        });

        let resolver = resolver(processes, files);
        let summary = summary(
            Agent::Opencode,
            "/h/.local/share/opencode/storage/session/default/ses_1.json",
            "ses_1",
        );
        assert_eq!(resolver.resolve_pids(&summary, ""), vec![8]);
    }

    #[test]
    fn test_session_id_in_args_stage() {
        let processes = FakeProcessTable::new(vec![ProcessInfo {
            pid: 55,
            user: "rob".to_string(),
            args: "gemini --resume 11111111-2222".to_string(),
        }]);
        let files = FakeOpenFiles::default();

        let resolver = resolver(processes, files);
        let summary = summary(
            Agent::Gemini,
            "/h/.gemini/tmp/abcd/chats/session-1.json",
            "11111111-2222",
        );
        assert_eq!(resolver.resolve_pids(&summary, ""), vec![55]);
    }

    #[test]
    fn test_multi_pid_same_tty_kept_else_abstain() {
        let mut processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 1,
                user: "rob".to_string(),
                args: "codex a".to_string(),
            },
            ProcessInfo {
                pid: 2,
                user: "rob".to_string(),
                args: "codex b".to_string(),
            },
        ]);
        processes.ttys.insert(1, "ttys001".to_string());
        processes.ttys.insert(2, "ttys001".to_string());
        let mut files = FakeOpenFiles::default();
        for pid in [1, 2] {
            files.owners.push(OpenFileOwner {
                pid,
                command: "codex".to_string(),
                user: "rob".to_string(),
            });
        }

        let resolver_same = resolver(processes, files);
        let summary_codex = summary(Agent::Codex, "/h/.codex/sessions/a.jsonl", "");
        assert_eq!(resolver_same.resolve_pids(&summary_codex, ""), vec![1, 2]);

        // Different ttys: abstain
        let mut processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 1,
                user: "rob".to_string(),
                args: "codex a".to_string(),
            },
            ProcessInfo {
                pid: 2,
                user: "rob".to_string(),
                args: "codex b".to_string(),
            },
        ]);
        processes.ttys.insert(1, "ttys001".to_string());
        processes.ttys.insert(2, "ttys002".to_string());
        let mut files = FakeOpenFiles::default();
        for pid in [1, 2] {
            files.owners.push(OpenFileOwner {
                pid,
                command: "codex".to_string(),
                user: "rob".to_string(),
            });
        }
        let resolver_split = resolver(processes, files);
        assert!(resolver_split.resolve_pids(&summary_codex, "").is_empty());
    }

    #[test]
    fn test_gemini_disambiguation_by_start_time() {
        let mut processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 10,
                user: "rob".to_string(),
                args: "gemini chat".to_string(),
            },
            ProcessInfo {
                pid: 20,
                user: "rob".to_string(),
                args: "gemini chat".to_string(),
            },
        ]);
        processes.ttys.insert(10, "ttys001".to_string());
        processes.ttys.insert(20, "ttys002".to_string());
        // Anchor below is 1_000_000; pid 10 started closer to it
        processes.start_times.insert(10, 1_010_000);
        processes.start_times.insert(20, 2_000_000);
        let mut files = FakeOpenFiles::default();
        for pid in [10, 20] {
            files.owners.push(OpenFileOwner {
                pid,
                command: "gemini".to_string(),
                user: "rob".to_string(),
            });
        }

        let resolver = resolver(processes, files);
        let mut s = summary(
            Agent::Gemini,
            "/h/.gemini/tmp/ff00/chats/session-1.json",
            "sess",
        );
        s.first_event_ts = Some(1_000_000);
        assert_eq!(resolver.resolve_pids(&s, ""), vec![10]);
    }

    #[test]
    fn test_gemini_exact_tie_abstains() {
        let mut processes = FakeProcessTable::new(vec![
            ProcessInfo {
                pid: 10,
                user: "rob".to_string(),
                args: "gemini chat".to_string(),
            },
            ProcessInfo {
                pid: 20,
                user: "rob".to_string(),
                args: "gemini chat".to_string(),
            },
        ]);
        processes.ttys.insert(10, "ttys001".to_string());
        processes.ttys.insert(20, "ttys002".to_string());
        processes.start_times.insert(10, 1_500_000);
        processes.start_times.insert(20, 500_000);
        let mut files = FakeOpenFiles::default();
        for pid in [10, 20] {
            files.owners.push(OpenFileOwner {
                pid,
                command: "gemini".to_string(),
                user: "rob".to_string(),
            });
        }

        let resolver = resolver(processes, files);
        let mut s = summary(
            Agent::Gemini,
            "/h/.gemini/tmp/ff00/chats/session-1.json",
            "sess",
        );
        // Equidistant anchor: both groups 500_000 away
        s.first_event_ts = Some(1_000_000);
        assert!(resolver.resolve_pids(&s, "").is_empty());
    }

    #[test]
    fn test_stop_reports_terminated() {
        let processes = FakeProcessTable::new(vec![ProcessInfo {
            pid: 99,
            user: "rob".to_string(),
            args: "codex".to_string(),
        }]);
        let resolver = resolver(processes, FakeOpenFiles::default());

        let report = resolver.stop(&[99], false);
        assert_eq!(report.status, StopStatus::Terminated);
        assert_eq!(report.signal, "SIGINT");
        assert!(report.alive_pids.is_empty());
    }

    #[test]
    fn test_stop_not_running() {
        let processes = FakeProcessTable::new(vec![]);
        let resolver = resolver(processes, FakeOpenFiles::default());
        let report = resolver.stop(&[12345], false);
        assert_eq!(report.status, StopStatus::NotRunning);
    }
}
