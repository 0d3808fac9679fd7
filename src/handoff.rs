use crate::auth::SsoSession;
use crate::aws::context_env;
use crate::config::AuthConfig;
use crate::model::{CloudContext, Screen};
use crate::provider::ResourceProvider;
use crate::task::compact_error;
use crate::ui::TuiTerminal;
use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, enable_raw_mode};
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// External program that temporarily takes over the terminal.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum HandoffRequest {
    SsmShell { instance_id: String },
    ClusterDashboard { cluster: String, arn: Option<String> },
    EditObject { bucket: String, key: String },
}

impl HandoffRequest {
    pub fn label(&self) -> String {
        match self {
            Self::SsmShell { instance_id } => format!("SSM session to {instance_id}"),
            Self::ClusterDashboard { cluster, .. } => format!("dashboard for {cluster}"),
            Self::EditObject { bucket, key } => format!("edit of s3://{bucket}/{key}"),
        }
    }
}

/// Everything needed to put the user back where they were once the child exits.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RestoreContext {
    pub screen: Screen,
    pub bucket: Option<String>,
    pub prefix: String,
    pub object_key: Option<String>,
    pub cluster: Option<String>,
    pub instance_id: Option<String>,
    pub context: CloudContext,
    pub sso: Option<SsoSession>,
    pub auth: Option<AuthConfig>,
    pub restore_pending: bool,
    /// Tasks stamped with an older generation were issued before this handoff.
    #[serde(default)]
    pub generation: u64,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HandoffPhase {
    Owned,
    Releasing,
    ChildRunning,
    Reclaiming,
}

/// Program names the handoffs launch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandoffSettings {
    pub aws_bin: String,
    pub editor: String,
    pub dashboard: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChildExit {
    pub success: bool,
    pub code: u32,
}

/// How a child run went, kept apart from whether the terminal came back cleanly.
#[derive(Debug)]
struct ChildRun {
    exit: Result<ChildExit>,
    reclaim_error: Option<anyhow::Error>,
}

impl ChildRun {
    fn with_reclaim_note(&self, notice: String) -> String {
        match &self.reclaim_error {
            Some(error) => format!("{notice}; terminal restore failed: {}", compact_error(error)),
            None => notice,
        }
    }
}

/// What happens to the scratch copy once the editor has exited.
#[derive(Debug, Clone, Eq, PartialEq)]
enum EditVerdict {
    Upload,
    Unchanged,
    Discard(String),
}

fn edit_verdict(exit: &Result<ChildExit>, changed: bool, key: &str) -> EditVerdict {
    match exit {
        Err(error) => EditVerdict::Discard(format!("Editor failed: {}", compact_error(error))),
        Ok(exit) if !exit.success => EditVerdict::Discard(format!(
            "Editor exited with code {}; {key} not uploaded",
            exit.code
        )),
        Ok(_) if !changed => EditVerdict::Unchanged,
        Ok(_) => EditVerdict::Upload,
    }
}

impl HandoffSettings {
    pub fn command_for(
        &self,
        request: &HandoffRequest,
        ctx: &CloudContext,
        file: Option<&Path>,
    ) -> Result<ChildCommand> {
        let env = context_env(ctx);
        match request {
            HandoffRequest::SsmShell { instance_id } => Ok(ChildCommand {
                program: self.aws_bin.clone(),
                args: vec![
                    "ssm".to_string(),
                    "start-session".to_string(),
                    "--target".to_string(),
                    instance_id.clone(),
                    "--region".to_string(),
                    ctx.region.clone(),
                ],
                env,
            }),
            HandoffRequest::ClusterDashboard { arn, .. } => {
                let (program, mut args) = split_program(&self.dashboard)?;
                if let Some(arn) = arn {
                    args.push("--context".to_string());
                    args.push(arn.clone());
                }
                Ok(ChildCommand { program, args, env })
            }
            HandoffRequest::EditObject { key, .. } => {
                let file = file.with_context(|| format!("no local copy of {key} to edit"))?;
                let (program, mut args) = split_program(&self.editor)?;
                args.push(file.display().to_string());
                Ok(ChildCommand { program, args, env })
            }
        }
    }
}

fn split_program(command_line: &str) -> Result<(String, Vec<String>)> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .with_context(|| format!("empty command line '{command_line}'"))?;
    Ok((program, parts.collect()))
}

/// Walks the terminal through release, child, and reclaim for one handoff.
pub struct HandoffController {
    phase: HandoffPhase,
}

impl Default for HandoffController {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffController {
    pub fn new() -> Self {
        Self {
            phase: HandoffPhase::Owned,
        }
    }

    pub fn phase(&self) -> HandoffPhase {
        self.phase
    }

    /// Runs the request to completion and returns the notice for the status line.
    pub async fn perform<P: ResourceProvider>(
        &mut self,
        terminal: &mut TuiTerminal,
        request: &HandoffRequest,
        ctx: &CloudContext,
        settings: &HandoffSettings,
        provider: &P,
    ) -> String {
        info!("starting {}", request.label());
        if let HandoffRequest::EditObject { bucket, key } = request {
            return self
                .edit_object(terminal, request, bucket, key, ctx, settings, provider)
                .await;
        }

        let command = match settings.command_for(request, ctx, None) {
            Ok(command) => command,
            Err(error) => {
                return format!(
                    "Could not start {}: {}",
                    request.label(),
                    compact_error(&error)
                );
            }
        };
        let run = self.run_in_terminal(terminal, command).await;
        let notice = match &run.exit {
            Ok(exit) if exit.success => format!("{} closed", request.label()),
            Ok(exit) => format!("{} exited with code {}", request.label(), exit.code),
            Err(error) => format!("{} failed: {}", request.label(), compact_error(error)),
        };
        run.with_reclaim_note(notice)
    }

    #[allow(clippy::too_many_arguments)]
    async fn edit_object<P: ResourceProvider>(
        &mut self,
        terminal: &mut TuiTerminal,
        request: &HandoffRequest,
        bucket: &str,
        key: &str,
        ctx: &CloudContext,
        settings: &HandoffSettings,
        provider: &P,
    ) -> String {
        let path = scratch_path(key);
        if let Err(error) = provider.download_object(ctx, bucket, key, &path).await {
            return format!("Could not download {key}: {}", compact_error(&error));
        }
        let before = modified_at(&path).await;

        let notice = match settings.command_for(request, ctx, Some(&path)) {
            Err(error) => format!("Could not start editor: {}", compact_error(&error)),
            Ok(command) => {
                let run = self.run_in_terminal(terminal, command).await;
                let changed = modified_at(&path).await != before;
                let notice = match edit_verdict(&run.exit, changed, key) {
                    EditVerdict::Discard(notice) => notice,
                    EditVerdict::Unchanged => format!("No changes to {key}"),
                    EditVerdict::Upload => {
                        match provider.upload_object(ctx, bucket, key, &path).await {
                            Ok(()) => format!("Uploaded {key}"),
                            Err(error) => {
                                format!("Upload of {key} failed: {}", compact_error(&error))
                            }
                        }
                    }
                };
                run.with_reclaim_note(notice)
            }
        };

        if let Err(error) = tokio::fs::remove_file(&path).await {
            debug!("failed to remove {}: {error}", path.display());
        }
        notice
    }

    async fn run_in_terminal(
        &mut self,
        terminal: &mut TuiTerminal,
        command: ChildCommand,
    ) -> ChildRun {
        if let Err(release_error) = self.release(terminal) {
            return ChildRun {
                exit: Err(release_error),
                reclaim_error: self.reclaim(terminal).err(),
            };
        }

        self.phase = HandoffPhase::ChildRunning;
        let exit = tokio::task::spawn_blocking(move || run_on_pty(command))
            .await
            .map_err(|error| anyhow!("pty host stopped unexpectedly: {error}"))
            .and_then(|result| result);
        let reclaim_error = self.reclaim(terminal).err();
        if let Some(error) = &reclaim_error {
            warn!("terminal not reclaimed after child exit: {error:#}");
        }
        ChildRun {
            exit,
            reclaim_error,
        }
    }

    /// Leaves the alternate screen but keeps raw mode so keys reach the child byte for byte.
    fn release(&mut self, terminal: &mut TuiTerminal) -> Result<()> {
        self.phase = HandoffPhase::Releasing;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)
            .context("failed to leave alternate screen for child process")?;
        terminal
            .show_cursor()
            .context("failed to show cursor for child process")?;
        enable_raw_mode().context("failed to keep raw mode for child process")?;
        Ok(())
    }

    fn reclaim(&mut self, terminal: &mut TuiTerminal) -> Result<()> {
        self.phase = HandoffPhase::Reclaiming;
        enable_raw_mode().context("failed to re-enable raw mode after child process")?;
        execute!(terminal.backend_mut(), EnterAlternateScreen)
            .context("failed to re-enter alternate screen after child process")?;
        terminal
            .clear()
            .context("failed to clear terminal after child process")?;
        self.phase = HandoffPhase::Owned;
        Ok(())
    }
}

const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn run_on_pty(command: ChildCommand) -> Result<ChildExit> {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    let pair = native_pty_system()
        .openpty(pty_size(cols, rows))
        .map_err(|error| anyhow!("failed to open pseudo-terminal: {error}"))?;

    let mut builder = CommandBuilder::new(&command.program);
    builder.args(&command.args);
    for (key, value) in &command.env {
        builder.env(key, value);
    }
    if let Ok(cwd) = std::env::current_dir() {
        builder.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(builder)
        .map_err(|error| anyhow!("failed to start {}: {error}", command.program))?;
    drop(pair.slave);

    let streams = pair
        .master
        .try_clone_reader()
        .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
    let (mut reader, writer) = match streams {
        Ok(streams) => streams,
        Err(error) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("failed to attach to pseudo-terminal: {error}"));
        }
    };

    let gate = Arc::new(Mutex::new(true));
    let (done_tx, done_rx) = std_mpsc::channel::<()>();
    let copier = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            copy_output(&mut reader, io::stdout(), &gate);
            let _ = done_tx.send(());
        })
    };

    let stop = Arc::new(AtomicBool::new(false));
    let input = {
        let stop = Arc::clone(&stop);
        let master = pair.master;
        thread::spawn(move || forward_input(master, writer, &stop))
    };

    let status = child.wait().context("failed to wait for child process");
    stop.store(true, Ordering::Relaxed);
    if input.join().is_err() {
        warn!("input forwarder panicked");
    }

    // A grandchild can hold the pty open past the child's exit; its output is dropped once
    // the gate closes, so nothing reaches the screen after the TUI takes it back.
    match done_rx.recv_timeout(OUTPUT_DRAIN) {
        Ok(()) => {
            if copier.join().is_err() {
                warn!("output copier panicked");
            }
        }
        Err(_) => debug!("pty output still open after child exit; muting it"),
    }
    *gate.lock().unwrap_or_else(PoisonError::into_inner) = false;

    let status = status?;
    Ok(ChildExit {
        success: status.success(),
        code: status.exit_code(),
    })
}

/// Copies child output to `out` while `gate` is open. The gate is held across each write.
fn copy_output(reader: &mut dyn Read, mut out: impl Write, gate: &Mutex<bool>) {
    let mut buffer = [0u8; 8192];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            break;
        }
        if out.write_all(&buffer[..read]).and_then(|()| out.flush()).is_err() {
            break;
        }
    }
}

fn forward_input(
    master: Box<dyn MasterPty + Send>,
    mut writer: Box<dyn Write + Send>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(Duration::from_millis(50)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                warn!("terminal poll failed during handoff: {error}");
                break;
            }
        }

        let bytes = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => encode_key(key),
            Ok(Event::Paste(text)) => Some(text.into_bytes()),
            Ok(Event::Resize(cols, rows)) => {
                if let Err(error) = master.resize(pty_size(cols, rows)) {
                    debug!("pty resize failed: {error}");
                }
                None
            }
            Ok(_) => None,
            Err(error) => {
                warn!("terminal read failed during handoff: {error}");
                break;
            }
        };

        if let Some(bytes) = bytes
            && writer.write_all(&bytes).and_then(|()| writer.flush()).is_err()
        {
            break;
        }
    }
}

/// Bytes a VT-style terminal would send for `key`.
pub fn encode_key(key: KeyEvent) -> Option<Vec<u8>> {
    let bytes: &[u8] = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let control = match c.to_ascii_lowercase() {
                letter @ 'a'..='z' => letter as u8 - b'a' + 1,
                ' ' | '@' | '2' => 0x00,
                '[' | '3' => 0x1b,
                '\\' | '4' => 0x1c,
                ']' | '5' => 0x1d,
                '^' | '6' => 0x1e,
                '_' | '7' | '/' => 0x1f,
                _ => return None,
            };
            return Some(vec![control]);
        }
        KeyCode::Char(c) => {
            let mut encoded = Vec::with_capacity(5);
            if key.modifiers.contains(KeyModifiers::ALT) {
                encoded.push(0x1b);
            }
            let mut utf8 = [0u8; 4];
            encoded.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            return Some(encoded);
        }
        KeyCode::Enter => b"\r",
        KeyCode::Tab => b"\t",
        KeyCode::BackTab => b"\x1b[Z",
        KeyCode::Backspace => &[0x7f],
        KeyCode::Esc => &[0x1b],
        KeyCode::Up => b"\x1b[A",
        KeyCode::Down => b"\x1b[B",
        KeyCode::Right => b"\x1b[C",
        KeyCode::Left => b"\x1b[D",
        KeyCode::Home => b"\x1b[H",
        KeyCode::End => b"\x1b[F",
        KeyCode::PageUp => b"\x1b[5~",
        KeyCode::PageDown => b"\x1b[6~",
        KeyCode::Insert => b"\x1b[2~",
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::F(n) => match n {
            1 => b"\x1bOP",
            2 => b"\x1bOQ",
            3 => b"\x1bOR",
            4 => b"\x1bOS",
            5 => b"\x1b[15~",
            6 => b"\x1b[17~",
            7 => b"\x1b[18~",
            8 => b"\x1b[19~",
            9 => b"\x1b[20~",
            10 => b"\x1b[21~",
            11 => b"\x1b[23~",
            12 => b"\x1b[24~",
            _ => return None,
        },
        _ => return None,
    };
    Some(bytes.to_vec())
}

fn scratch_path(key: &str) -> PathBuf {
    let name = key
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("object")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect::<String>();
    std::env::temp_dir().join(format!("cirrus-{}-{name}", std::process::id()))
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|metadata| metadata.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::{
        ChildExit, ChildRun, EditVerdict, HandoffController, HandoffPhase, HandoffRequest,
        HandoffSettings, RestoreContext, copy_output, edit_verdict, encode_key, scratch_path,
    };
    use crate::model::{CloudContext, DetailKind, Screen};
    use anyhow::anyhow;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;

    fn settings() -> HandoffSettings {
        HandoffSettings {
            aws_bin: "aws".to_string(),
            editor: "code --wait".to_string(),
            dashboard: "k9s".to_string(),
        }
    }

    #[test]
    fn keys_encode_like_a_vt_terminal() {
        let plain = |code| encode_key(KeyEvent::new(code, KeyModifiers::NONE));
        assert_eq!(plain(KeyCode::Enter), Some(b"\r".to_vec()));
        assert_eq!(plain(KeyCode::Backspace), Some(vec![0x7f]));
        assert_eq!(plain(KeyCode::Up), Some(b"\x1b[A".to_vec()));
        assert_eq!(plain(KeyCode::Char('é')), Some("é".as_bytes().to_vec()));
        assert_eq!(plain(KeyCode::F(5)), Some(b"\x1b[15~".to_vec()));
        assert_eq!(plain(KeyCode::CapsLock), None);

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(ctrl_c), Some(vec![0x03]));
        let alt_b = KeyEvent::new(KeyCode::Char('b'), KeyModifiers::ALT);
        assert_eq!(encode_key(alt_b), Some(vec![0x1b, b'b']));
    }

    #[test]
    fn ssm_command_targets_instance_in_context_region() {
        let mut ctx = CloudContext::new("eu-west-1");
        ctx.profile = Some("ops".to_string());
        let request = HandoffRequest::SsmShell {
            instance_id: "i-0abc".to_string(),
        };
        let command = settings().command_for(&request, &ctx, None).expect("command");
        assert_eq!(command.program, "aws");
        assert_eq!(
            command.args,
            vec!["ssm", "start-session", "--target", "i-0abc", "--region", "eu-west-1"]
        );
        assert!(command.env.contains(&("AWS_PROFILE", "ops".to_string())));
    }

    #[test]
    fn dashboard_uses_cluster_arn_as_context() {
        let request = HandoffRequest::ClusterDashboard {
            cluster: "prod".to_string(),
            arn: Some("arn:aws:eks:eu-west-1:1:cluster/prod".to_string()),
        };
        let command = settings()
            .command_for(&request, &CloudContext::new("eu-west-1"), None)
            .expect("command");
        assert_eq!(command.program, "k9s");
        assert_eq!(
            command.args,
            vec!["--context", "arn:aws:eks:eu-west-1:1:cluster/prod"]
        );
    }

    #[test]
    fn editor_command_keeps_its_flags_and_needs_a_file() {
        let request = HandoffRequest::EditObject {
            bucket: "logs".to_string(),
            key: "a/b.json".to_string(),
        };
        let ctx = CloudContext::new("us-east-1");
        assert!(settings().command_for(&request, &ctx, None).is_err());

        let command = settings()
            .command_for(&request, &ctx, Some(Path::new("/tmp/b.json")))
            .expect("command");
        assert_eq!(command.program, "code");
        assert_eq!(command.args, vec!["--wait", "/tmp/b.json"]);
    }

    #[test]
    fn scratch_file_keeps_extension_and_strips_separators() {
        let path = scratch_path("reports/2024 q1.csv");
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name");
        assert!(name.starts_with("cirrus-"));
        assert!(name.ends_with("2024_q1.csv"));
    }

    #[test]
    fn restore_context_survives_serialization() {
        let restore = RestoreContext {
            screen: Screen::ResourceDetail(DetailKind::Object),
            bucket: Some("logs".to_string()),
            prefix: "2024/".to_string(),
            object_key: Some("2024/app.log".to_string()),
            cluster: None,
            instance_id: None,
            context: CloudContext::new("eu-west-1"),
            sso: None,
            auth: None,
            restore_pending: true,
            generation: 2,
            notice: Some("Uploaded 2024/app.log".to_string()),
        };
        let encoded = serde_json::to_string(&restore).expect("encode");
        let decoded: RestoreContext = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, restore);
    }

    #[test]
    fn restore_context_without_generation_decodes_as_first() {
        let mut value = serde_json::to_value(RestoreContext {
            screen: Screen::ObjectBrowse,
            bucket: Some("logs".to_string()),
            prefix: String::new(),
            object_key: None,
            cluster: None,
            instance_id: None,
            context: CloudContext::new("eu-west-1"),
            sso: None,
            auth: None,
            restore_pending: true,
            generation: 4,
            notice: None,
        })
        .expect("encode");
        value
            .as_object_mut()
            .expect("object")
            .remove("generation");
        let decoded: RestoreContext = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded.generation, 0);
    }

    #[test]
    fn successful_edit_uploads_even_if_terminal_restore_fails() {
        let run = ChildRun {
            exit: Ok(ChildExit {
                success: true,
                code: 0,
            }),
            reclaim_error: Some(anyhow!("failed to re-enter alternate screen")),
        };
        assert_eq!(edit_verdict(&run.exit, true, "a.json"), EditVerdict::Upload);
        let notice = run.with_reclaim_note("Uploaded a.json".to_string());
        assert!(notice.starts_with("Uploaded a.json; terminal restore failed"));
    }

    #[test]
    fn failed_or_untouched_edit_is_not_uploaded() {
        let failed = Ok(ChildExit {
            success: false,
            code: 1,
        });
        assert_eq!(
            edit_verdict(&failed, true, "a.json"),
            EditVerdict::Discard("Editor exited with code 1; a.json not uploaded".to_string())
        );
        let clean = Ok(ChildExit {
            success: true,
            code: 0,
        });
        assert_eq!(edit_verdict(&clean, false, "a.json"), EditVerdict::Unchanged);
        assert!(matches!(
            edit_verdict(&Err(anyhow!("no such editor")), true, "a.json"),
            EditVerdict::Discard(_)
        ));
    }

    #[test]
    fn output_copier_stops_once_gate_closes() {
        let mut out = Vec::new();
        copy_output(&mut Cursor::new(b"prompt$ ".to_vec()), &mut out, &Mutex::new(true));
        assert_eq!(out, b"prompt$ ");

        let mut muted = Vec::new();
        copy_output(&mut Cursor::new(b"late output".to_vec()), &mut muted, &Mutex::new(false));
        assert!(muted.is_empty());
    }

    #[test]
    fn controller_starts_owning_the_terminal() {
        assert_eq!(HandoffController::new().phase(), HandoffPhase::Owned);
    }
}
