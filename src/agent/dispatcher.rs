//! # Command Dispatcher
//!
//! Routes inbound uplink messages to their handlers.
//!
//! ## Verbs
//!
//! | verb   | args                | reply topic |
//! |--------|---------------------|-------------|
//! | `gps`  | none                | `gps`       |
//! | `gpsd` | none                | `gps`       |
//! | `cmd`  | command string      | none        |
//! | `tail` | line count, path    | `tail`      |
//! | `truck`| `get` / `set`, id   | `tail`      |
//!
//! Unknown verbs are ignored without a reply. Handler failures are logged and
//! never leave `dispatch`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::engine::ReportEngine;
use super::state::{IdentityStore, SharedState};
use crate::codec::{decode, encode, Frame, WireForm};
use crate::config::{CommandsConfig, GpsConfig};
use crate::error::{Result, TrackerError};
use crate::gps::FixProvider;
use crate::transport::{Topic, Transport};

/// Reply content substituted when a tail read fails
pub const TAIL_ERROR_SENTINEL: &str = "error";

/// Bytes read from the end of a file when tailing
const TAIL_WINDOW_BYTES: u64 = 64 * 1024;

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub args: Vec<String>,
}

impl Command {
    /// Split a decoded frame into verb and arguments; an empty verb is no command
    pub fn parse(frame: Frame) -> Option<Self> {
        let mut fields = frame.into_fields().into_iter();
        let verb = fields.next()?.trim().to_string();
        if verb.is_empty() {
            return None;
        }
        Some(Self {
            verb,
            args: fields.collect(),
        })
    }

    fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Arguments from `index` on, rejoined with the field separator
    fn rest(&self, index: usize) -> Option<String> {
        if index >= self.args.len() {
            return None;
        }
        Some(self.args[index..].join(":"))
    }
}

/// Recognised verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Gps,
    GpsFresh,
    Shell,
    Tail,
    Truck,
}

impl Verb {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gps" => Some(Verb::Gps),
            "gpsd" => Some(Verb::GpsFresh),
            "cmd" => Some(Verb::Shell),
            "tail" => Some(Verb::Tail),
            "truck" => Some(Verb::Truck),
            _ => None,
        }
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Message could not be decoded
    Dropped,

    /// Unknown verb
    Ignored,

    Handled(Verb),

    /// Handler failed; the failure was logged
    Failed(Verb),
}

/// Host command execution capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Start `command`; completion is not awaited
    async fn run(&self, command: &str) -> Result<()>;
}

/// Runs commands through `<shell> -c`, detached from the dispatcher
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let command = command.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Command '{}' finished", command),
                Ok(status) => warn!("Command '{}' exited with {}", command, status),
                Err(e) => warn!("Failed to wait for command '{}': {}", command, e),
            }
        });
        Ok(())
    }
}

/// Dispatcher limits taken from configuration
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub fix_max_age: Duration,
    pub acquire_timeout: Duration,
    pub shell_enabled: bool,
    pub tail_max_lines: usize,
}

impl DispatchSettings {
    pub fn from_config(gps: &GpsConfig, commands: &CommandsConfig) -> Self {
        Self {
            fix_max_age: Duration::from_secs(gps.fix_max_age_secs),
            acquire_timeout: Duration::from_secs(gps.acquire_timeout_secs),
            shell_enabled: commands.shell_enabled,
            tail_max_lines: commands.tail_max_lines,
        }
    }
}

/// Inbound command dispatcher
pub struct CommandDispatcher {
    state: SharedState,
    engine: Arc<ReportEngine>,
    fixes: Arc<dyn FixProvider>,
    transport: Arc<dyn Transport>,
    identity: IdentityStore,
    runner: Arc<dyn CommandRunner>,
    settings: DispatchSettings,
}

impl CommandDispatcher {
    pub fn new(
        state: SharedState,
        engine: Arc<ReportEngine>,
        fixes: Arc<dyn FixProvider>,
        transport: Arc<dyn Transport>,
        identity: IdentityStore,
        runner: Arc<dyn CommandRunner>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            state,
            engine,
            fixes,
            transport,
            identity,
            runner,
            settings,
        }
    }

    /// Handle one raw inbound message
    pub async fn dispatch(&self, raw: &[u8]) -> Outcome {
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping invalid message: {}", e);
                return Outcome::Dropped;
            }
        };

        let Some(command) = Command::parse(frame) else {
            warn!("Dropping message without a verb");
            return Outcome::Dropped;
        };

        let Some(verb) = Verb::from_name(&command.verb) else {
            debug!("Ignoring unknown verb '{}'", command.verb);
            return Outcome::Ignored;
        };

        info!("Handling '{}' command", command.verb);
        let result = match verb {
            Verb::Gps => self.handle_gps().await,
            Verb::GpsFresh => self.handle_gps_fresh().await,
            Verb::Shell => self.handle_shell(&command).await,
            Verb::Tail => self.handle_tail(&command).await,
            Verb::Truck => self.handle_truck(&command).await,
        };

        match result {
            Ok(()) => Outcome::Handled(verb),
            Err(e) if e.is_expected() => {
                debug!("'{}' command: {}", command.verb, e);
                Outcome::Failed(verb)
            }
            Err(e) => {
                warn!("'{}' command failed: {}", command.verb, e);
                Outcome::Failed(verb)
            }
        }
    }

    /// Cached fix if fresh, else a new acquisition, else the last reported position
    async fn handle_gps(&self) -> Result<()> {
        let position = match self.fixes.cached(self.settings.fix_max_age) {
            Some(position) => Some(position),
            None => match self.fixes.acquire(self.settings.acquire_timeout).await {
                Ok(position) => Some(position),
                Err(e) => {
                    debug!("Fix acquisition for gps command failed: {}", e);
                    None
                }
            },
        };

        let mut state = self.state.lock().await;
        let position = position
            .or(state.last_reported_position)
            .ok_or(TrackerError::FixUnavailable)?;
        self.engine.reply(&mut state, position).await?;
        Ok(())
    }

    async fn handle_gps_fresh(&self) -> Result<()> {
        let position = self.fixes.acquire(self.settings.acquire_timeout).await?;

        let mut state = self.state.lock().await;
        self.engine.reply(&mut state, position).await?;
        Ok(())
    }

    async fn handle_shell(&self, command: &Command) -> Result<()> {
        let line = command
            .rest(0)
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| TrackerError::InvalidCommand("cmd needs a command string".to_string()))?;

        if !self.settings.shell_enabled {
            return Err(TrackerError::NotPermitted(format!("shell execution disabled: {}", line)));
        }

        info!("Running command: {}", line);
        self.runner.run(&line).await
    }

    async fn handle_tail(&self, command: &Command) -> Result<()> {
        let (Some(count), Some(path)) = (command.arg(0), command.rest(1)) else {
            return Err(TrackerError::InvalidCommand("tail needs a line count and a path".to_string()));
        };

        let content = match read_tail(Path::new(&path), count, self.settings.tail_max_lines).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to tail {}: {}", path, e);
                TAIL_ERROR_SENTINEL.to_string()
            }
        };

        let payload = encode(&["tail", path.as_str(), content.as_str()], WireForm::Armored)?;
        self.transport.send(&payload, Topic::Tail).await
    }

    async fn handle_truck(&self, command: &Command) -> Result<()> {
        let payload = {
            let mut state = self.state.lock().await;

            match command.arg(0) {
                Some("get") => {
                    state.truck_id = self.identity.read_truck().await?;
                }
                Some("set") => {
                    let new_id = command
                        .arg(1)
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| TrackerError::InvalidCommand("truck set needs an id".to_string()))?;
                    self.identity.write_truck(new_id).await?;
                    state.truck_id = new_id.to_string();
                }
                other => debug!("truck command without get/set ({:?}), replying with current id", other),
            }

            encode(&["truck", state.truck_id.as_str()], WireForm::Armored)?
        };

        self.transport.send(&payload, Topic::Tail).await
    }
}

/// Last `count` lines of `path`, capped at `max_lines`
///
/// Only the final window of the file is read, so large logs stay cheap.
pub async fn read_tail(path: &Path, count: &str, max_lines: usize) -> Result<String> {
    let count: usize = count
        .trim()
        .parse()
        .map_err(|_| TrackerError::InvalidCommand(format!("bad line count '{}'", count)))?;
    let count = count.min(max_lines);

    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);

    // One byte before the window tells whether it opens on a line boundary
    let lookbehind = if start > 0 { 1 } else { 0 };
    file.seek(std::io::SeekFrom::Start(start - lookbehind)).await?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    let opens_mid_line = lookbehind == 1 && bytes.first() != Some(&b'\n');
    let text = String::from_utf8_lossy(bytes.get(lookbehind as usize..).unwrap_or_default());

    let mut lines: Vec<&str> = text.lines().collect();
    if opens_mid_line && lines.len() > 1 {
        lines.remove(0);
    }

    let first = lines.len().saturating_sub(count);
    Ok(lines[first..].join("\n"))
}
