use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Signals the stop action escalates through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Int,
    Term,
    Kill,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Int => "SIGINT",
            Signal::Term => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }

    fn raw(&self) -> i32 {
        match self {
            Signal::Int => libc::SIGINT,
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Who the daemon runs as; candidate processes must match
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub uid: u32,
    pub own_pid: i32,
}

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: i32,
    pub user: String,
    pub args: String,
}

/// One record out of `lsof -Fpcu <path>`
#[derive(Debug, Clone)]
pub struct OpenFileOwner {
    pub pid: i32,
    pub command: String,
    /// Username or numeric uid, as lsof reports it
    pub user: String,
}

/// The process table the resolver reads: listing, tty, start time,
/// liveness, and signal delivery. Pluggable so tests substitute a fake
/// and other platforms substitute their own tooling.
pub trait ProcessTable: Send + Sync {
    fn identity(&self) -> Identity;
    fn list(&self) -> Result<Vec<ProcessInfo>>;
    fn tty_of(&self, pid: i32) -> Result<Option<String>>;
    /// Process start time in epoch ms, from `ps -o lstart=`
    fn start_time_of(&self, pid: i32) -> Result<Option<i64>>;
    fn is_alive(&self, pid: i32) -> bool;
    fn signal(&self, pid: i32, signal: Signal) -> Result<()>;
}

/// Open-file table access (`lsof`)
pub trait OpenFiles: Send + Sync {
    /// Processes holding the given path open
    fn owners_of(&self, path: &Path) -> Result<Vec<OpenFileOwner>>;
    /// A process's current working directory
    fn cwd_of(&self, pid: i32) -> Result<Option<String>>;
    /// Paths a process holds open
    fn open_paths(&self, pid: i32) -> Result<Vec<String>>;
}

// --- Real implementations ---

pub struct PsProcessTable;

impl ProcessTable for PsProcessTable {
    fn identity(&self) -> Identity {
        let uid = unsafe { libc::getuid() };
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| uid.to_string());
        Identity {
            username,
            uid,
            own_pid: std::process::id() as i32,
        }
    }

    fn list(&self) -> Result<Vec<ProcessInfo>> {
        let output = Command::new("ps")
            .args(["-axo", "pid=,user=,args="])
            .output()?;
        if !output.status.success() {
            return Err(Error::Subprocess(format!(
                "ps exited with {}",
                output.status
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut processes = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim_start();
            let mut parts = trimmed.splitn(3, char::is_whitespace);
            let (Some(pid), Some(user)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(pid) = pid.parse::<i32>() else {
                continue;
            };
            let args = parts.next().unwrap_or("").trim().to_string();
            processes.push(ProcessInfo {
                pid,
                user: user.to_string(),
                args,
            });
        }
        Ok(processes)
    }

    fn tty_of(&self, pid: i32) -> Result<Option<String>> {
        let output = Command::new("ps")
            .args(["-o", "tty=", "-p", &pid.to_string()])
            .output()?;
        let tty = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if tty.is_empty() || tty == "??" || tty == "?" {
            Ok(None)
        } else {
            Ok(Some(normalize_tty(&tty)))
        }
    }

    fn start_time_of(&self, pid: i32) -> Result<Option<i64>> {
        let output = Command::new("ps")
            .args(["-o", "lstart=", "-p", &pid.to_string()])
            .output()?;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(parse_lstart(&text))
    }

    fn is_alive(&self, pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }

    fn signal(&self, pid: i32, signal: Signal) -> Result<()> {
        let rc = unsafe { libc::kill(pid, signal.raw()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(Error::Signal(format!(
                "kill({}, {}) failed: {}",
                pid,
                signal.as_str(),
                std::io::Error::last_os_error()
            )))
        }
    }
}

/// `ps -o lstart=` prints e.g. "Mon Jan  5 10:30:00 2026" in the C locale.
fn parse_lstart(text: &str) -> Option<i64> {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// ttys come back as "ttys004" from ps but "/dev/ttys004" from tmux
pub fn normalize_tty(tty: &str) -> String {
    let trimmed = tty.trim();
    if let Some(stripped) = trimmed.strip_prefix("/dev/") {
        stripped.to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct LsofOpenFiles;

impl LsofOpenFiles {
    fn run_lsof(args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("lsof").args(args).output()?;
        // Exit 1 with empty output is lsof's "no matches" answer
        if !output.status.success() {
            if output.stdout.is_empty() {
                return Ok(None);
            }
            // Partial results still usable (lsof warns a lot)
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl OpenFiles for LsofOpenFiles {
    fn owners_of(&self, path: &Path) -> Result<Vec<OpenFileOwner>> {
        let path_str = path.to_string_lossy();
        let Some(text) = Self::run_lsof(&["-Fpcu", path_str.as_ref()])? else {
            return Ok(Vec::new());
        };

        // -F output: one field per line, record starts at 'p'
        let mut owners = Vec::new();
        let mut current: Option<OpenFileOwner> = None;
        for line in text.lines() {
            match line.split_at_checked(1) {
                Some(("p", pid)) => {
                    if let Some(done) = current.take() {
                        owners.push(done);
                    }
                    if let Ok(pid) = pid.parse::<i32>() {
                        current = Some(OpenFileOwner {
                            pid,
                            command: String::new(),
                            user: String::new(),
                        });
                    }
                }
                Some(("c", command)) => {
                    if let Some(owner) = current.as_mut() {
                        owner.command = command.to_string();
                    }
                }
                Some(("u", user)) => {
                    if let Some(owner) = current.as_mut() {
                        owner.user = user.to_string();
                    }
                }
                _ => {}
            }
        }
        if let Some(done) = current.take() {
            owners.push(done);
        }
        Ok(owners)
    }

    fn cwd_of(&self, pid: i32) -> Result<Option<String>> {
        let pid_str = pid.to_string();
        let Some(text) = Self::run_lsof(&["-a", "-d", "cwd", "-p", &pid_str, "-Fn"])? else {
            return Ok(None);
        };
        Ok(text
            .lines()
            .find_map(|l| l.strip_prefix('n'))
            .map(|s| s.to_string()))
    }

    fn open_paths(&self, pid: i32) -> Result<Vec<String>> {
        let pid_str = pid.to_string();
        let Some(text) = Self::run_lsof(&["-p", &pid_str, "-Fn"])? else {
            return Ok(Vec::new());
        };
        Ok(text
            .lines()
            .filter_map(|l| l.strip_prefix('n'))
            .map(|s| s.to_string())
            .collect())
    }
}

/// Read the last `max_bytes` of a file as text (debug logs, opencode logs).
pub fn read_tail(path: &Path, max_bytes: u64) -> Result<String> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes))?;
    }
    let mut buf = String::new();
    // Lossy read: a seek can land mid-codepoint
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    buf.push_str(&String::from_utf8_lossy(&bytes));
    Ok(buf)
}

/// Tmux socket paths for the current uid, across the usual temp roots.
pub fn tmux_socket_dirs(uid: u32) -> Vec<PathBuf> {
    vec![
        PathBuf::from(format!("/tmp/tmux-{}", uid)),
        PathBuf::from(format!("/private/tmp/tmux-{}", uid)),
    ]
}
