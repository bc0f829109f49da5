use serde::Serialize;
use std::time::Duration;

use crate::system::Signal;
use crate::tmux::{ordered_clients, TmuxPane};
use crate::Resolver;

/// How long to wait for processes to die after SIGINT/SIGTERM
pub const STOP_SIGNAL_WAIT_MS: u64 = 1_500;
/// How long to wait after SIGKILL
pub const STOP_FORCE_WAIT_MS: u64 = 1_000;
/// Poll cadence inside the wait loops
pub const STOP_WAIT_POLL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Terminated,
    NotRunning,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub status: StopStatus,
    /// Last signal delivered
    pub signal: String,
    /// Pids still alive when we gave up
    pub alive_pids: Vec<i32>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenStatus {
    FocusedPane,
    GhosttyActivated,
    NotResolvable,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenReport {
    pub status: OpenStatus,
    /// `tmuxSession:window.pane` when a pane was focused
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    SentTmux,
    NotResolvable,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputReport {
    pub status: InputStatus,
    pub target: String,
    pub reason: String,
}

impl Resolver {
    fn alive_of(&self, pids: &[i32]) -> Vec<i32> {
        pids.iter()
            .copied()
            .filter(|pid| self.processes.is_alive(*pid))
            .collect()
    }

    /// Wait for the pids to die, polling until the deadline. Returns the
    /// survivors at the moment the wait ended.
    fn wait_for_exit(&self, pids: &[i32], wait_ms: u64) -> Vec<i32> {
        let deadline = std::time::Instant::now() + Duration::from_millis(wait_ms);
        loop {
            let alive = self.alive_of(pids);
            if alive.is_empty() || std::time::Instant::now() >= deadline {
                return alive;
            }
            std::thread::sleep(Duration::from_millis(STOP_WAIT_POLL_MS));
        }
    }

    /// Stop the session's processes: SIGINT, wait, SIGTERM, wait, and
    /// SIGKILL only when forced.
    pub fn stop(&self, pids: &[i32], force: bool) -> StopReport {
        let mut alive = self.alive_of(pids);
        if alive.is_empty() {
            return StopReport {
                status: StopStatus::NotRunning,
                signal: String::new(),
                alive_pids: Vec::new(),
                reason: "no live process owns this session".to_string(),
            };
        }

        let mut plan = vec![(Signal::Int, STOP_SIGNAL_WAIT_MS), (Signal::Term, STOP_SIGNAL_WAIT_MS)];
        if force {
            plan.push((Signal::Kill, STOP_FORCE_WAIT_MS));
        }

        let mut last_signal = Signal::Int;
        for (signal, wait_ms) in plan {
            last_signal = signal;
            let mut delivery_failed = Vec::new();
            for pid in &alive {
                if let Err(err) = self.processes.signal(*pid, signal) {
                    tracing::warn!(pid, signal = signal.as_str(), error = %err, "signal delivery failed");
                    delivery_failed.push(*pid);
                }
            }
            // A pid we cannot signal at all (EPERM) will never die from here
            if delivery_failed.len() == alive.len() {
                return StopReport {
                    status: StopStatus::Failed,
                    signal: signal.as_str().to_string(),
                    alive_pids: alive,
                    reason: "signal delivery refused for every pid".to_string(),
                };
            }

            alive = self.wait_for_exit(&alive, wait_ms);
            if alive.is_empty() {
                return StopReport {
                    status: StopStatus::Terminated,
                    signal: signal.as_str().to_string(),
                    alive_pids: Vec::new(),
                    reason: String::new(),
                };
            }
        }

        StopReport {
            status: StopStatus::Failed,
            signal: last_signal.as_str().to_string(),
            alive_pids: alive.clone(),
            reason: format!("{} process(es) survived the signal ladder", alive.len()),
        }
    }

    /// Find the tmux pane whose tty belongs to the pid.
    fn pane_for_pid(&self, pid: i32) -> Option<TmuxPane> {
        let tty = self.processes.tty_of(pid).ok().flatten()?;
        let panes = self.tmux.panes().ok()?;
        panes.into_iter().find(|p| p.tty == tty)
    }

    /// Bring the session's pane into view: select its window and pane,
    /// switch every client over (preferred client first), and poke the
    /// terminal app forward around the switch.
    pub fn open(&self, pids: &[i32]) -> OpenReport {
        let alive = self.alive_of(pids);
        let Some(&pid) = alive.first() else {
            return OpenReport {
                status: OpenStatus::NotResolvable,
                target: String::new(),
                reason: "no live process to focus".to_string(),
            };
        };

        let Some(pane) = self.pane_for_pid(pid) else {
            // Not under tmux: raising the terminal app is the best we have
            return match self.activate.activate() {
                Ok(()) => OpenReport {
                    status: OpenStatus::GhosttyActivated,
                    target: String::new(),
                    reason: String::new(),
                },
                Err(_) => OpenReport {
                    status: OpenStatus::NotResolvable,
                    target: String::new(),
                    reason: format!("pid {} has no tmux pane", pid),
                },
            };
        };

        let target = pane.target();
        let _ = self.activate.activate();

        if let Err(err) = self
            .tmux
            .select_window(&pane.socket, &pane.session, &pane.window_index)
        {
            return OpenReport {
                status: OpenStatus::Failed,
                target,
                reason: err.to_string(),
            };
        }
        if let Err(err) = self.tmux.select_pane(&pane.socket, &target) {
            return OpenReport {
                status: OpenStatus::Failed,
                target,
                reason: err.to_string(),
            };
        }

        let clients = self.tmux.clients(&pane.socket).unwrap_or_default();
        for client in ordered_clients(&clients, &pane.session) {
            if let Err(err) = self
                .tmux
                .switch_client(&pane.socket, &client.tty, &pane.session)
            {
                tracing::debug!(client = %client.tty, error = %err, "switch-client failed");
            }
        }

        let _ = self.activate.activate();

        OpenReport {
            status: OpenStatus::FocusedPane,
            target,
            reason: String::new(),
        }
    }

    /// Type text into the session's pane, optionally submitting it.
    pub fn send_input(&self, pids: &[i32], text: &str, submit: bool) -> InputReport {
        let alive = self.alive_of(pids);
        let Some(&pid) = alive.first() else {
            return InputReport {
                status: InputStatus::NotResolvable,
                target: String::new(),
                reason: "no live process to send to".to_string(),
            };
        };
        let Some(pane) = self.pane_for_pid(pid) else {
            return InputReport {
                status: InputStatus::NotResolvable,
                target: String::new(),
                reason: format!("pid {} has no tmux pane", pid),
            };
        };

        let target = pane.target();
        if let Err(err) = self.tmux.send_keys(&pane.socket, &target, text, true) {
            return InputReport {
                status: InputStatus::Failed,
                target,
                reason: err.to_string(),
            };
        }
        if submit {
            if let Err(err) = self.tmux.send_keys(&pane.socket, &target, "Enter", false) {
                return InputReport {
                    status: InputStatus::Failed,
                    target,
                    reason: err.to_string(),
                };
            }
        }

        InputReport {
            status: InputStatus::SentTmux,
            target,
            reason: String::new(),
        }
    }
}
