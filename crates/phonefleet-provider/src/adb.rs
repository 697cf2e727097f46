//! adb CLI wrapper
//!
//! Wraps the `adb` binary for container and physical devices, and provides
//! [`AdbControl`], the ADB-backed implementation of the input, file, app and
//! media capabilities shared by those adapters.

use crate::error::{ProviderError, Result};
use crate::provider::{AppManagement, FileTransferControl, InputControl, MediaCapture};
use crate::types::{AppInstallOptions, FileTransfer, KeyEvent, SwipeEvent, TextInput, TouchEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

/// adb CLI wrapper
#[derive(Debug, Clone)]
pub struct Adb {
    binary: String,
    command_timeout: Duration,
}

impl Default for Adb {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            command_timeout: Duration::from_secs(60),
        }
    }
}

impl Adb {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run an adb command and return raw stdout
    async fn run_command(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.binary, args.join(" "));

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("adb {} timed out", args.first().unwrap_or(&"")))
            })?
            .map_err(|e| ProviderError::Backend(format!("failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Backend(format!(
                "adb {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn run_text(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run_command(args).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["-s", serial, "shell"];
        full.extend_from_slice(args);
        self.run_text(&full).await
    }

    /// `adb connect host:port`
    pub async fn connect(&self, serial: &str) -> Result<()> {
        let output = self.run_text(&["connect", serial]).await?;
        // adb connect は失敗しても exit 0 を返す
        if output.contains("connected to") {
            Ok(())
        } else {
            Err(ProviderError::transient("AdbConnectFailed", output))
        }
    }

    pub async fn disconnect(&self, serial: &str) -> Result<()> {
        self.run_text(&["disconnect", serial]).await.map(|_| ())
    }

    /// `device`, `offline`, `bootloader`, ... as reported by `adb get-state`
    pub async fn get_state(&self, serial: &str) -> Result<String> {
        self.run_text(&["-s", serial, "get-state"]).await
    }

    pub async fn getprop(&self, serial: &str, name: &str) -> Result<String> {
        self.shell(serial, &["getprop", name]).await
    }

    pub async fn reboot(&self, serial: &str) -> Result<()> {
        self.run_text(&["-s", serial, "reboot"]).await.map(|_| ())
    }

    pub async fn tap(&self, serial: &str, x: u32, y: u32) -> Result<()> {
        let (x, y) = (x.to_string(), y.to_string());
        self.shell(serial, &["input", "tap", &x, &y]).await.map(|_| ())
    }

    pub async fn swipe(&self, serial: &str, event: &SwipeEvent) -> Result<()> {
        let args = [
            event.start_x.to_string(),
            event.start_y.to_string(),
            event.end_x.to_string(),
            event.end_y.to_string(),
            event.duration_ms.to_string(),
        ];
        let mut full = vec!["input", "swipe"];
        full.extend(args.iter().map(|s| s.as_str()));
        self.shell(serial, &full).await.map(|_| ())
    }

    pub async fn keyevent(&self, serial: &str, key_code: u32) -> Result<()> {
        let code = key_code.to_string();
        self.shell(serial, &["input", "keyevent", &code])
            .await
            .map(|_| ())
    }

    pub async fn text(&self, serial: &str, text: &str) -> Result<()> {
        let escaped = escape_input_text(text);
        self.shell(serial, &["input", "text", &escaped])
            .await
            .map(|_| ())
    }

    pub async fn push(&self, serial: &str, local: &str, remote: &str) -> Result<()> {
        self.run_text(&["-s", serial, "push", local, remote])
            .await
            .map(|_| ())
    }

    pub async fn pull(&self, serial: &str, remote: &str, local: &str) -> Result<()> {
        self.run_text(&["-s", serial, "pull", remote, local])
            .await
            .map(|_| ())
    }

    pub async fn install(&self, serial: &str, apk_path: &str, reinstall: bool) -> Result<()> {
        let mut args = vec!["-s", serial, "install"];
        if reinstall {
            args.push("-r");
        }
        args.push(apk_path);
        let output = self.run_text(&args).await?;
        if output.contains("Failure") {
            return Err(ProviderError::terminal("InstallFailed", output));
        }
        Ok(())
    }

    pub async fn uninstall(&self, serial: &str, package_name: &str) -> Result<()> {
        let output = self.run_text(&["-s", serial, "uninstall", package_name]).await?;
        if output.contains("Failure") {
            return Err(ProviderError::terminal("UninstallFailed", output));
        }
        Ok(())
    }

    /// PNG bytes via `exec-out screencap -p`
    pub async fn screencap(&self, serial: &str) -> Result<Vec<u8>> {
        self.run_command(&["-s", serial, "exec-out", "screencap", "-p"])
            .await
    }

    /// Read a file from the device as bytes
    pub async fn read_file(&self, serial: &str, remote: &str) -> Result<Vec<u8>> {
        self.run_command(&["-s", serial, "exec-out", "cat", remote])
            .await
    }

    pub async fn remove_file(&self, serial: &str, remote: &str) -> Result<()> {
        self.shell(serial, &["rm", "-f", remote]).await.map(|_| ())
    }

    /// Start `screenrecord` in the background; the child runs until
    /// interrupted or `time_limit_secs` elapses
    pub fn spawn_screenrecord(
        &self,
        serial: &str,
        remote: &str,
        time_limit_secs: u32,
    ) -> Result<Child> {
        let limit = time_limit_secs.to_string();
        Command::new(&self.binary)
            .args([
                "-s",
                serial,
                "shell",
                "screenrecord",
                "--time-limit",
                &limit,
                remote,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Backend(format!("failed to start screenrecord: {}", e)))
    }

    pub async fn interrupt_screenrecord(&self, serial: &str) -> Result<()> {
        self.shell(serial, &["pkill", "-INT", "screenrecord"])
            .await
            .map(|_| ())
    }
}

/// Escape text for `input text`
///
/// `input text` treats spaces as separators and the shell interprets metacharacters.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\'' | '"' | '\\' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' | '`' | '*'
            | '?' | '!' | '#' | '~' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Maps a device id to the adb serial of the device
#[async_trait]
pub trait SerialResolver: Send + Sync {
    async fn resolve_serial(&self, device_id: &str) -> Result<String>;
}

/// Default and upper bound for screen recordings (Android caps screenrecord at 180s)
const MAX_RECORDING_SECS: u32 = 180;

struct Recording {
    serial: String,
    remote_path: String,
    child: Child,
}

/// ADB-backed input, file, app and media capabilities
pub struct AdbControl {
    adb: Adb,
    resolver: Arc<dyn SerialResolver>,
    recordings: Mutex<HashMap<String, Recording>>,
}

impl AdbControl {
    pub fn new(adb: Adb, resolver: Arc<dyn SerialResolver>) -> Self {
        Self {
            adb,
            resolver,
            recordings: Mutex::new(HashMap::new()),
        }
    }

    pub fn adb(&self) -> &Adb {
        &self.adb
    }

    async fn serial(&self, device_id: &str) -> Result<String> {
        self.resolver.resolve_serial(device_id).await
    }

    fn take_recording(&self, recording_id: &str) -> Option<Recording> {
        self.recordings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(recording_id)
    }
}

#[async_trait]
impl InputControl for AdbControl {
    async fn send_touch(&self, device_id: &str, event: TouchEvent) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb.tap(&serial, event.x, event.y).await
    }

    async fn send_swipe(&self, device_id: &str, event: SwipeEvent) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb.swipe(&serial, &event).await
    }

    async fn send_key(&self, device_id: &str, event: KeyEvent) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb.keyevent(&serial, event.key_code).await
    }

    async fn input_text(&self, device_id: &str, input: &TextInput) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb.text(&serial, &input.text).await
    }
}

#[async_trait]
impl FileTransferControl for AdbControl {
    async fn push_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb
            .push(&serial, &transfer.local_path, &transfer.remote_path)
            .await
    }

    async fn pull_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb
            .pull(&serial, &transfer.remote_path, &transfer.local_path)
            .await
    }
}

#[async_trait]
impl AppManagement for AdbControl {
    async fn install_app(&self, device_id: &str, options: &AppInstallOptions) -> Result<String> {
        let serial = self.serial(device_id).await?;
        self.adb
            .install(&serial, &options.apk_path, options.reinstall)
            .await?;
        Ok(options.package_name.clone().unwrap_or_else(|| {
            Path::new(&options.apk_path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        }))
    }

    async fn uninstall_app(&self, device_id: &str, package_name: &str) -> Result<()> {
        let serial = self.serial(device_id).await?;
        self.adb.uninstall(&serial, package_name).await
    }
}

#[async_trait]
impl MediaCapture for AdbControl {
    async fn take_screenshot(&self, device_id: &str) -> Result<Vec<u8>> {
        let serial = self.serial(device_id).await?;
        self.adb.screencap(&serial).await
    }

    async fn start_recording(
        &self,
        device_id: &str,
        max_duration_secs: Option<u32>,
    ) -> Result<String> {
        let serial = self.serial(device_id).await?;
        let limit = max_duration_secs
            .unwrap_or(MAX_RECORDING_SECS)
            .clamp(1, MAX_RECORDING_SECS);
        let recording_id = format!("rec-{}", chrono::Utc::now().timestamp_millis());
        let remote_path = format!("/sdcard/{}.mp4", recording_id);

        let child = self.adb.spawn_screenrecord(&serial, &remote_path, limit)?;
        tracing::info!(device_id, recording_id = %recording_id, "Screen recording started");

        self.recordings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                recording_id.clone(),
                Recording {
                    serial,
                    remote_path,
                    child,
                },
            );
        Ok(recording_id)
    }

    async fn stop_recording(&self, device_id: &str, recording_id: &str) -> Result<Vec<u8>> {
        let Some(mut recording) = self.take_recording(recording_id) else {
            return Err(ProviderError::terminal(
                "RecordingNotFound",
                format!("no recording {} for device {}", recording_id, device_id),
            ));
        };

        self.adb.interrupt_screenrecord(&recording.serial).await?;
        // screenrecord は SIGINT 後に mp4 を書き終えてから終了する
        if tokio::time::timeout(Duration::from_secs(10), recording.child.wait())
            .await
            .is_err()
        {
            tracing::warn!(device_id, recording_id, "screenrecord did not exit, killing");
            let _ = recording.child.kill().await;
        }

        let bytes = self
            .adb
            .read_file(&recording.serial, &recording.remote_path)
            .await?;
        if let Err(e) = self
            .adb
            .remove_file(&recording.serial, &recording.remote_path)
            .await
        {
            tracing::debug!(error = %e, "Failed to remove recording from device");
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl SerialResolver for Fixed {
        async fn resolve_serial(&self, _device_id: &str) -> Result<String> {
            Ok("127.0.0.1:5555".to_string())
        }
    }

    #[test]
    fn test_escape_input_text() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("a&b"), "a\\&b");
        assert_eq!(escape_input_text("it's"), "it\\'s");
        assert_eq!(escape_input_text("plain"), "plain");
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_backend_error() {
        let adb = Adb::new("/nonexistent/phonefleet-adb");
        let err = adb.get_state("127.0.0.1:5555").await.unwrap_err();
        assert!(matches!(err, ProviderError::Backend(_)));
    }

    #[tokio::test]
    async fn test_stop_unknown_recording() {
        let control = AdbControl::new(Adb::new("/nonexistent/phonefleet-adb"), Arc::new(Fixed));
        let err = control
            .stop_recording("d-1", "rec-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Terminal { ref code, .. } if code == "RecordingNotFound"));
    }
}
