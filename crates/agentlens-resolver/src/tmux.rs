use std::path::{Path, PathBuf};
use std::process::Command;

use crate::system::{normalize_tty, tmux_socket_dirs};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct TmuxPane {
    pub socket: PathBuf,
    pub session: String,
    pub window_index: String,
    pub pane_index: String,
    /// Normalized (no /dev/ prefix)
    pub tty: String,
}

impl TmuxPane {
    /// `session:window.pane` form accepted by tmux -t
    pub fn target(&self) -> String {
        format!("{}:{}.{}", self.session, self.window_index, self.pane_index)
    }
}

#[derive(Debug, Clone)]
pub struct TmuxClient {
    pub socket: PathBuf,
    pub tty: String,
    pub session: String,
    /// client_activity epoch seconds
    pub activity: i64,
    pub focused: bool,
}

/// Terminal-multiplexer access: pane/client enumeration and focus
/// commands. Pluggable for tests and for non-tmux multiplexers.
pub trait TmuxControl: Send + Sync {
    /// All panes across every discovered socket
    fn panes(&self) -> Result<Vec<TmuxPane>>;
    fn clients(&self, socket: &Path) -> Result<Vec<TmuxClient>>;
    fn select_window(&self, socket: &Path, session: &str, window: &str) -> Result<()>;
    fn select_pane(&self, socket: &Path, target: &str) -> Result<()>;
    fn switch_client(&self, socket: &Path, client_tty: &str, session: &str) -> Result<()>;
    /// `send-keys -l` when literal, key names otherwise
    fn send_keys(&self, socket: &Path, target: &str, keys: &str, literal: bool) -> Result<()>;
}

/// Platform hook that raises the terminal application's window
pub trait ActivateHook: Send + Sync {
    fn activate(&self) -> Result<()>;
}

/// Deterministic client choice for focusing a pane:
/// sort by (focused desc, activity desc, tty asc), then prefer a focused
/// client not already on the target session, then any focused client,
/// then any client not on the target, then the first.
pub fn select_preferred<'a>(
    clients: &'a [TmuxClient],
    target_session: &str,
) -> Option<&'a TmuxClient> {
    ordered_clients(clients, target_session).into_iter().next()
}

/// Full switch order: the preferred client first, the rest in sort order.
pub fn ordered_clients<'a>(
    clients: &'a [TmuxClient],
    target_session: &str,
) -> Vec<&'a TmuxClient> {
    let mut sorted: Vec<&TmuxClient> = clients.iter().collect();
    sorted.sort_by(|a, b| {
        b.focused
            .cmp(&a.focused)
            .then(b.activity.cmp(&a.activity))
            .then(a.tty.cmp(&b.tty))
    });

    let preferred = sorted
        .iter()
        .position(|c| c.focused && c.session != target_session)
        .or_else(|| sorted.iter().position(|c| c.focused))
        .or_else(|| sorted.iter().position(|c| c.session != target_session))
        .or(if sorted.is_empty() { None } else { Some(0) });

    if let Some(idx) = preferred {
        let chosen = sorted.remove(idx);
        sorted.insert(0, chosen);
    }
    sorted
}

// --- CLI implementation ---

pub struct TmuxCli {
    uid: u32,
}

impl TmuxCli {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }

    fn sockets(&self) -> Vec<PathBuf> {
        let mut sockets = Vec::new();
        for dir in tmux_socket_dirs(self.uid) {
            let Ok(read) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in read.filter_map(|e| e.ok()) {
                sockets.push(entry.path());
            }
        }
        sockets
    }

    fn run(&self, socket: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("tmux")
            .arg("-S")
            .arg(socket)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(Error::Subprocess(format!(
                "tmux {} exited with {}",
                args.first().unwrap_or(&""),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TmuxControl for TmuxCli {
    fn panes(&self) -> Result<Vec<TmuxPane>> {
        let mut panes = Vec::new();
        for socket in self.sockets() {
            let Ok(text) = self.run(
                &socket,
                &[
                    "list-panes",
                    "-a",
                    "-F",
                    "#{pane_tty}\t#{session_name}\t#{window_index}\t#{pane_index}",
                ],
            ) else {
                continue; // dead socket file
            };
            for line in text.lines() {
                let parts: Vec<&str> = line.split('\t').collect();
                if parts.len() != 4 {
                    continue;
                }
                panes.push(TmuxPane {
                    socket: socket.clone(),
                    tty: normalize_tty(parts[0]),
                    session: parts[1].to_string(),
                    window_index: parts[2].to_string(),
                    pane_index: parts[3].to_string(),
                });
            }
        }
        Ok(panes)
    }

    fn clients(&self, socket: &Path) -> Result<Vec<TmuxClient>> {
        let text = self.run(
            socket,
            &[
                "list-clients",
                "-F",
                "#{client_tty}\t#{client_session}\t#{client_activity}\t#{client_flags}",
            ],
        )?;
        let mut clients = Vec::new();
        for line in text.lines() {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 3 {
                continue;
            }
            clients.push(TmuxClient {
                socket: socket.to_path_buf(),
                tty: normalize_tty(parts[0]),
                session: parts[1].to_string(),
                activity: parts[2].parse().unwrap_or(0),
                focused: parts.get(3).map(|f| f.contains("focused")).unwrap_or(false),
            });
        }
        Ok(clients)
    }

    fn select_window(&self, socket: &Path, session: &str, window: &str) -> Result<()> {
        self.run(
            socket,
            &["select-window", "-t", &format!("{}:{}", session, window)],
        )
        .map(|_| ())
    }

    fn select_pane(&self, socket: &Path, target: &str) -> Result<()> {
        self.run(socket, &["select-pane", "-t", target]).map(|_| ())
    }

    fn switch_client(&self, socket: &Path, client_tty: &str, session: &str) -> Result<()> {
        let client = format!("/dev/{}", client_tty);
        self.run(socket, &["switch-client", "-c", &client, "-t", session])
            .map(|_| ())
    }

    fn send_keys(&self, socket: &Path, target: &str, keys: &str, literal: bool) -> Result<()> {
        let mut args: Vec<&str> = vec!["send-keys", "-t", target];
        if literal {
            args.push("-l");
        }
        args.push(keys);
        self.run(socket, &args).map(|_| ())
    }
}

/// Ghostty "activate" hook: bring the terminal app forward on macOS.
/// Failure is tolerated everywhere else.
pub struct GhosttyActivate;

impl ActivateHook for GhosttyActivate {
    fn activate(&self) -> Result<()> {
        let output = Command::new("osascript")
            .args(["-e", "tell application \"Ghostty\" to activate"])
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Subprocess("osascript activate failed".to_string()))
        }
    }
}
