//! launcher.rs
//!
//! Platform-neutral pieces of launching a run profile:
//! - `open_log` / `append_marker`: per-profile log file and marker lines
//! - `activation_script`: POSIX `source .venv/bin/activate && <command>`
//! - `translate_command`: Windows rewrite of well-known prefixes onto the venv interpreter
//! - `shell_command`: the command a health probe runs inside the agent's environment
//! - `tail_log`, `port_is_open`: status helpers for the embedding UI

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;

use crate::agents::VirtualEnv;
use crate::constants::{LOG_MARKER, PORT_CHECK_TIMEOUT};

// =============================================================================
// Process log
// =============================================================================

/// Create (or truncate) the per-profile log file
pub fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Write one `[agent-manager] <line>` marker to an open log
pub fn write_marker(log: &mut File, line: &str) -> io::Result<()> {
    writeln!(log, "{} {}", LOG_MARKER, line)?;
    log.flush()
}

/// Append one marker line to the log at `path`, creating it if needed
pub fn append_marker(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut log = OpenOptions::new().create(true).append(true).open(path)?;
    write_marker(&mut log, line)
}

// =============================================================================
// Command construction
// =============================================================================

/// `source <activate> && <command>` for `bash -lc`
pub fn activation_script(venv: &VirtualEnv, command: &str) -> String {
    let activate = venv.activate_script();
    let quoted = shell_escape::unix::escape(Cow::from(activate.to_string_lossy().into_owned()));
    format!("source {} && {}", quoted, command)
}

/// Rewrite a profile command into an argv that runs without shell activation
///
/// - `streamlit run ...` -> `<python> -m streamlit run ...`
/// - `python3 ...` / `python ...` -> `<python> ...`
/// - `uvicorn ...` -> `<python> -m uvicorn ...`
/// - anything else -> `cmd /C <command>`
pub fn translate_command(command: &str, python: &Path) -> Vec<String> {
    let args = split_args(command);
    let python = python.to_string_lossy().into_owned();

    match args.first().map(String::as_str) {
        Some("streamlit") if args.get(1).map(String::as_str) == Some("run") => {
            let mut argv = vec![python, "-m".to_string()];
            argv.extend(args);
            argv
        }
        Some("python3") | Some("python") => {
            let mut argv = vec![python];
            argv.extend(args.into_iter().skip(1));
            argv
        }
        Some("uvicorn") => {
            let mut argv = vec![python, "-m".to_string()];
            argv.extend(args);
            argv
        }
        _ => vec!["cmd".to_string(), "/C".to_string(), command.to_string()],
    }
}

/// Whitespace split honouring double quotes
fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in command.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Build a command running `command` inside the agent's environment
///
/// Errors when the virtual environment is missing.
pub fn shell_command(command: &str, working_dir: &Path) -> Result<std::process::Command, String> {
    let venv = VirtualEnv::for_agent(working_dir);
    if !venv.exists() {
        return Err(format!("Virtual environment not found at {}", venv.dir().display()));
    }

    let mut cmd = if cfg!(windows) {
        let argv = translate_command(command, &venv.python());
        let mut cmd = std::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    } else {
        let mut cmd = std::process::Command::new("bash");
        cmd.arg("-lc").arg(activation_script(&venv, command));
        cmd
    };
    cmd.current_dir(working_dir);
    Ok(cmd)
}

// =============================================================================
// Status helpers
// =============================================================================

/// Last `max_lines` lines of a log; empty when missing or unreadable
pub fn tail_log(path: &Path, max_lines: usize) -> String {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Whether something accepts TCP connections on 127.0.0.1:`port`
pub fn port_is_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, PORT_CHECK_TIMEOUT).is_ok()
}
