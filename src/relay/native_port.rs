//! Ways for the relay to reach a native messaging host.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

use super::RelayError;
use crate::host::{read_frame_async, write_frame_async, NmError, MAX_TO_BROWSER};
use crate::native::{NativeHost, OsSystem, SystemApi};

/// One-shot native messaging: send one message to a named host, await its reply.
#[async_trait]
pub trait NativeMessaging: Send + Sync {
    async fn send_native_message(&self, host_id: &str, message: Value) -> Result<Value, RelayError>;
}

fn check_host_id(registered: &str, requested: &str) -> Result<(), RelayError> {
    if registered != requested {
        return Err(RelayError::HostNotFound(requested.to_string()));
    }
    Ok(())
}

/// Runs the host core in-process, on the blocking pool since operations
/// may spawn commands.
pub struct InProcessNativeMessaging<S = OsSystem> {
    host_id: String,
    host: Arc<NativeHost<S>>,
}

impl<S: SystemApi> InProcessNativeMessaging<S> {
    pub fn new(host_id: impl Into<String>, host: NativeHost<S>) -> Self {
        Self {
            host_id: host_id.into(),
            host: Arc::new(host),
        }
    }
}

#[async_trait]
impl<S: SystemApi + 'static> NativeMessaging for InProcessNativeMessaging<S> {
    async fn send_native_message(&self, host_id: &str, message: Value) -> Result<Value, RelayError> {
        check_host_id(&self.host_id, host_id)?;
        let host = Arc::clone(&self.host);
        let reply = tokio::task::spawn_blocking(move || host.handle(Some(&message)).to_value())
            .await
            .map_err(NmError::Join)?;
        Ok(reply)
    }
}

/// Spawns the registered host executable once per message, the way browsers
/// serve one-shot native messages.
#[derive(Debug, Clone)]
pub struct ProcessNativeMessaging {
    host_id: String,
    program: PathBuf,
}

impl ProcessNativeMessaging {
    pub fn new(host_id: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            host_id: host_id.into(),
            program: program.into(),
        }
    }
}

#[async_trait]
impl NativeMessaging for ProcessNativeMessaging {
    async fn send_native_message(&self, host_id: &str, message: Value) -> Result<Value, RelayError> {
        check_host_id(&self.host_id, host_id)?;

        // kill_on_drop: an abandoned (timed out) call must not leave the host running.
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(RelayError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(RelayError::PipeUnavailable("stdin"))?;
        let mut stdout = child.stdout.take().ok_or(RelayError::PipeUnavailable("stdout"))?;

        write_frame_async(&mut stdin, &message).await?;
        // EOF tells the host this was the only message.
        drop(stdin);

        let raw = read_frame_async(&mut stdout, MAX_TO_BROWSER).await?;
        debug!(host_id, bytes = raw.len(), "native host replied");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!(%status, "native host exited abnormally"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to reap native host"),
            }
        });

        serde_json::from_str(&raw).map_err(RelayError::MalformedReply)
    }
}
