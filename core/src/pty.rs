//! Spawning and bridging PTY child processes.
//!
//! A child's stdout is read on a dedicated blocking thread and forwarded
//! into an async channel; resize requests cross a std channel to a second
//! thread that owns the PTY master; a third thread polls `try_wait()` and
//! reports the run state transition exactly once.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{self, Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

/// Characters that would let a caller-supplied command string escape a
/// single argument if it were ever interpolated into a shell. Spawning
/// itself never invokes a shell, but the check is kept as the contract
/// callers are written against.
const DISALLOWED_COMMAND_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '{', '}', '\n'];

/// Environment variables a caller's overrides may never set, because
/// leaking them into an agent's shell would let it hijack the host
/// process's own dynamic loader or tooling.
const ENV_DENYLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "NODE_OPTIONS",
    "ELECTRON_RUN_AS_NODE",
];

/// Variables belonging to the hosting process's own runtime identity; a
/// spawned agent must never see itself as the host's own session, so these
/// are removed even if a caller's overrides try to set them.
const ENV_ALWAYS_REMOVE: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_SESSION", "CLAUDE_CODE_ENTRYPOINT"];

/// Validate a raw command string before it is ever handed to
/// `CommandBuilder`. Rejects characters that only make sense as shell
/// metacharacters.
pub fn validate_command(command: &str) -> Result<(), String> {
    if let Some(c) = command.chars().find(|c| DISALLOWED_COMMAND_CHARS.contains(c)) {
        return Err(format!("command contains disallowed character {:?}", c));
    }
    Ok(())
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

fn default_home() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/"))
}

fn build_command(
    command: &str,
    args: &[String],
    cwd: &Path,
    env_overrides: &HashMap<String, String>,
) -> CommandBuilder {
    let mut c = CommandBuilder::new(command);
    for a in args {
        c.arg(a);
    }
    c.cwd(cwd);
    // CommandBuilder inherits the process environment by default; layer the
    // fixed overrides on top of it.
    c.env("TERM", "xterm-256color");
    c.env("COLORTERM", "truecolor");

    for (key, value) in env_overrides {
        if ENV_DENYLIST.iter().any(|d| d == key) {
            continue;
        }
        c.env(key, value);
    }
    for key in ENV_ALWAYS_REMOVE {
        c.env_remove(key);
    }
    c
}

/// Bridge to a spawned PTY child: a writer for stdin, and the child handle
/// kept alive so a separate thread can poll its exit status.
pub struct PtyBridge {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
}

/// Sender used to request a PTY resize; consumed by a dedicated thread that
/// owns the PTY master and is the only thing allowed to call `resize()`.
pub type ResizeSender = sync::mpsc::Sender<(u16, u16)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Exited { exit_code: i32 },
}

/// Spawn `command` (or the caller's shell/`/bin/sh` if empty, with no args)
/// inside a PTY rooted at `cwd` (or `$HOME`/`/` if empty), sized
/// `cols`x`rows`, with `env_overrides` merged over the fixed TERM/COLORTERM
/// pair after the deny list is applied.
///
/// Returns the bridge, a channel of raw output chunks, a resize sender, and
/// a channel that reports exactly one `Running` transition followed by
/// exactly one `Exited` transition.
pub fn spawn_pty(
    command: &str,
    args: &[String],
    cwd: &Path,
    cols: u16,
    rows: u16,
    env_overrides: &HashMap<String, String>,
) -> anyhow::Result<(
    PtyBridge,
    mpsc::Receiver<Vec<u8>>,
    ResizeSender,
    mpsc::Receiver<RunState>,
)> {
    validate_command(command).map_err(anyhow::Error::msg)?;

    let (command, args): (String, Vec<String>) = if command.trim().is_empty() {
        (default_shell(), Vec::new())
    } else {
        (command.to_string(), args.to_vec())
    };
    let cwd = if cwd.as_os_str().is_empty() {
        default_home()
    } else {
        cwd.to_path_buf()
    };

    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    })?;

    let cmd = build_command(&command, &args, &cwd, env_overrides);
    let child = pair.slave.spawn_command(cmd)?;

    let mut reader = pair.master.try_clone_reader()?;
    let writer = pair.master.take_writer()?;
    let master = pair.master;

    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    let (resize_tx, resize_rx) = sync::mpsc::channel::<(u16, u16)>();
    let (state_tx, state_rx) = mpsc::channel::<RunState>(4);

    let child = Arc::new(Mutex::new(child));

    // Blocking thread: read PTY stdout and forward raw chunks to the pool.
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // Dedicated thread: the only caller of master.resize().
    std::thread::spawn(move || {
        while let Ok((cols, rows)) = resize_rx.recv() {
            let size = PtySize {
                cols,
                rows,
                pixel_width: 0,
                pixel_height: 0,
            };
            let _ = master.resize(size);
        }
    });

    // Poll try_wait(); emit Running once, then Exited when the child ends.
    let child_poll = Arc::clone(&child);
    std::thread::spawn(move || {
        let mut sent_running = false;
        loop {
            let exit_status = {
                let mut guard = match child_poll.lock() {
                    Ok(g) => g,
                    Err(_) => break,
                };
                match guard.try_wait() {
                    Ok(None) => None,
                    Ok(Some(s)) => Some(s.exit_code() as i32),
                    Err(_) => break,
                }
            };
            if let Some(exit_code) = exit_status {
                let _ = state_tx.blocking_send(RunState::Exited { exit_code });
                break;
            }
            if !sent_running {
                sent_running = true;
                let _ = state_tx.blocking_send(RunState::Running);
            }
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
    });

    let bridge = PtyBridge {
        writer: Arc::new(Mutex::new(writer)),
        child,
    };
    Ok((bridge, rx, resize_tx, state_rx))
}

impl PtyBridge {
    pub fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("pty writer mutex poisoned"))?;
        guard.write_all(data)
    }

    pub fn kill(&self) -> std::io::Result<()> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| std::io::Error::other("pty child mutex poisoned"))?;
        guard.kill()
    }
}
