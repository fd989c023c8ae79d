//! Native messaging: the helper runs as our child process.
//!
//! Each message is a 4-byte little-endian length followed by that many bytes
//! of UTF-8 JSON, in both directions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use sudolikeaboss_protocol::Command;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tokio::task::JoinHandle;

use super::{Transport, TransportError};

/// Native messaging host registered by the desktop app.
pub const HOST_NAME: &str = "2bua8c4s2c.com.agilebits.1password";

/// Origin passed to the host as its only argument.
pub const EXTENSION_ID: &str = "chrome-extension://aomjjhallfgjeglblehebfpbcfeobpgk/";

pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Manifest
// ============================================================================

/// Browser-side description of a native messaging host.
#[derive(Debug, Clone, Deserialize)]
pub struct HostManifest {
    pub path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl HostManifest {
    pub async fn load(path: &Path) -> Result<Self, TransportError> {
        let manifest_error = |message: String| TransportError::Manifest {
            path: path.to_path_buf(),
            message,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| manifest_error(e.to_string()))?;
        let manifest: HostManifest =
            serde_json::from_slice(&bytes).map_err(|e| manifest_error(e.to_string()))?;
        if manifest.path.as_os_str().is_empty() {
            return Err(manifest_error("`path` is empty".to_string()));
        }
        if !manifest.allowed_origins.is_empty()
            && !manifest.allowed_origins.iter().any(|o| o == EXTENSION_ID)
        {
            warn!(
                "Manifest {} does not list {EXTENSION_ID} in allowed_origins",
                path.display()
            );
        }
        Ok(manifest)
    }
}

/// Where Chrome looks for the 1Password host manifest on this platform.
pub fn default_manifest_path() -> Option<PathBuf> {
    let base = dirs::config_dir()?;
    let dir = if cfg!(target_os = "macos") {
        base.join("Google").join("Chrome")
    } else {
        base.join("google-chrome")
    };
    Some(
        dir.join("NativeMessagingHosts")
            .join(format!("{HOST_NAME}.json")),
    )
}

// ============================================================================
// Framing
// ============================================================================

/// Read one length-prefixed frame. End of stream reads as [`TransportError::Closed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    read_exact_or_closed(reader, &mut prefix).await?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body).await?;
    Ok(body)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(TransportError::Io {
            context: "reading from native messaging host",
            source: e,
        }),
    }
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| TransportError::FrameTooLarge(body.len()))?;

    let context = "writing to native messaging host";
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(TransportError::io(context))?;
    writer
        .write_all(body)
        .await
        .map_err(TransportError::io(context))?;
    writer.flush().await.map_err(TransportError::io(context))
}

// ============================================================================
// Transport
// ============================================================================

/// A running native messaging host.
///
/// The child is killed if this value is dropped without [`Transport::close`].
pub struct NativeMessagingTransport {
    child: Child,
    program: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

impl NativeMessagingTransport {
    /// Launch the host named by the manifest at `manifest_path`.
    pub async fn launch(manifest_path: &Path) -> Result<Self, TransportError> {
        let manifest = HostManifest::load(manifest_path).await?;
        Self::spawn(&manifest.path, &[EXTENSION_ID])
    }

    pub fn spawn(program: &Path, args: &[&str]) -> Result<Self, TransportError> {
        let program_name = program.display().to_string();
        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program_name.clone(),
                source,
            })?;
        info!(
            "Started native messaging host {program_name} (pid {:?})",
            child.id()
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(stderr_reader_task(stderr)));

        Ok(Self {
            child,
            program: program_name,
            stdin,
            stdout,
            stderr_task,
        })
    }

    /// Ask the child to stop: SIGINT where available, otherwise a hard kill.
    fn interrupt(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: kill(2) on our own child's pid has no memory-safety preconditions.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc == 0 {
                return;
            }
            warn!(
                "Failed to interrupt {} (pid {pid}): {}",
                self.program,
                std::io::Error::last_os_error()
            );
        }
        if let Err(e) = self.child.start_kill() {
            debug!("start_kill on {}: {e}", self.program);
        }
    }
}

async fn stderr_reader_task(stderr: tokio::process::ChildStderr) {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!("Native host stderr: {}", line);
        }
    }
    debug!("Native host stderr reader ended");
}

#[async_trait]
impl Transport for NativeMessagingTransport {
    async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let json = command.to_json()?;
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        write_frame(stdin, json.as_bytes()).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let stdout = self.stdout.as_mut().ok_or(TransportError::Closed)?;
        read_frame(stdout).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stdin.is_none() && self.stdout.is_none() {
            return Ok(());
        }
        // EOF on stdin is the polite shutdown signal.
        drop(self.stdin.take());
        self.interrupt();

        if let Some(mut stdout) = self.stdout.take() {
            let mut rest = Vec::new();
            match tokio::time::timeout(CLOSE_GRACE, stdout.read_to_end(&mut rest)).await {
                Ok(Ok(_)) => {
                    if let Some(text) = trailing_output(&rest) {
                        debug!("Trailing stdout from {}: {text}", self.program);
                    }
                }
                Ok(Err(e)) => debug!("Draining stdout of {}: {e}", self.program),
                Err(_) => debug!("Timed out draining stdout of {}", self.program),
            }
        }

        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {status}", self.program),
            Ok(Err(e)) => warn!("Waiting for {}: {e}", self.program),
            Err(_) => {
                warn!("{} did not exit, killing it", self.program);
                self.child
                    .kill()
                    .await
                    .map_err(TransportError::io("killing native messaging host"))?;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, task).await;
        }
        Ok(())
    }
}

/// Leftover stdout as loggable text, or `None` if there is nothing to show.
fn trailing_output(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_trailing_output_is_lossy_text() {
        assert_eq!(trailing_output(b""), None);
        assert_eq!(trailing_output(b" \n"), None);
        assert_eq!(trailing_output(b"bye\n").as_deref(), Some("bye"));
        assert_eq!(
            trailing_output(b"\x07\x00\x00\x00{\xff}").as_deref(),
            Some("\u{7}\0\0\0{\u{fffd}}")
        );
    }

    #[tokio::test]
    async fn test_frame_prefix_is_little_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, br#"{"a":1}"#).await.unwrap();
        assert_eq!(&out[..4], &[7, 0, 0, 0]);
        assert_eq!(&out[4..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_frames_through_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let big = vec![b'x'; 300];

        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"hello").await.unwrap();
            write_frame(&mut client, b"").await.unwrap();
            write_frame(&mut client, &big).await.unwrap();
        });

        assert_eq!(read_frame(&mut server).await.unwrap(), b"hello");
        assert!(read_frame(&mut server).await.unwrap().is_empty());
        assert_eq!(read_frame(&mut server).await.unwrap().len(), 300);
        writer.await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_rejected() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0x7f];
        assert!(matches!(
            read_frame(&mut input).await,
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_closed() {
        let mut input: &[u8] = &[10, 0, 0, 0, b'{'];
        assert!(matches!(
            read_frame(&mut input).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_manifest_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("host.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"name":"{HOST_NAME}","path":"/opt/1Password/helper","type":"stdio","allowed_origins":["{EXTENSION_ID}"]}}"#
            ),
        )
        .unwrap();

        let manifest = HostManifest::load(&path).await.unwrap();
        assert_eq!(manifest.path, PathBuf::from("/opt/1Password/helper"));
        assert_eq!(manifest.kind.as_deref(), Some("stdio"));
    }

    #[tokio::test]
    async fn test_manifest_errors() {
        let temp = TempDir::new().unwrap();
        let missing = HostManifest::load(&temp.path().join("missing.json")).await;
        assert!(matches!(missing, Err(TransportError::Manifest { .. })));

        let path = temp.path().join("empty.json");
        std::fs::write(&path, r#"{"path":""}"#).unwrap();
        assert!(matches!(
            HostManifest::load(&path).await,
            Err(TransportError::Manifest { .. })
        ));
    }

    #[test]
    fn test_default_manifest_path_names_host() {
        if let Some(path) = default_manifest_path() {
            assert!(path.ends_with(format!("NativeMessagingHosts/{HOST_NAME}.json")));
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let err = NativeMessagingTransport::spawn(Path::new("/nonexistent/host"), &[])
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
