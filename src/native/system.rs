//! OS access used by the native host handlers.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::warn;

use super::HostError;

/// Buffer for `gethostname(2)`, sized to the platform maximum plus NUL.
pub const HOSTNAME_BUF_LEN: usize = 256;

/// OS facilities the native host can call.
///
/// [`OsSystem`] is the real implementation; tests substitute their own to
/// force lookup failures.
pub trait SystemApi: Send + Sync {
    fn hostname(&self) -> Result<String, HostError>;

    fn run_command(&self, program: &Path, args: &[&str]) -> Result<String, HostError> {
        run_command(program, args)
    }
}

impl<S: SystemApi + ?Sized> SystemApi for Arc<S> {
    fn hostname(&self) -> Result<String, HostError> {
        (**self).hostname()
    }

    fn run_command(&self, program: &Path, args: &[&str]) -> Result<String, HostError> {
        (**self).run_command(program, args)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsSystem;

impl SystemApi for OsSystem {
    fn hostname(&self) -> Result<String, HostError> {
        lookup_hostname()
    }
}

#[cfg(unix)]
fn lookup_hostname() -> Result<String, HostError> {
    let mut buf = [0u8; HOSTNAME_BUF_LEN];
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return Err(HostError::HostNameUnavailable { errno });
    }
    name_from_buffer(&buf)
}

#[cfg(not(unix))]
fn lookup_hostname() -> Result<String, HostError> {
    let name = hostname::get().map_err(|e| HostError::HostNameUnavailable {
        errno: e.raw_os_error().unwrap_or(0),
    })?;
    let name = name.into_string().map_err(|raw| {
        warn!(name = ?raw, "hostname is not valid UTF-8");
        HostError::HostNameUnavailable { errno: 0 }
    })?;
    if name.is_empty() {
        return Err(HostError::HostNameUnavailable { errno: 0 });
    }
    Ok(name)
}

/// Read a C string out of a lookup buffer. POSIX leaves truncated names
/// unterminated, so a missing NUL takes the whole buffer. The bytes are
/// passed through unchanged or not at all.
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn name_from_buffer(buf: &[u8]) -> Result<String, HostError> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    if end == 0 {
        return Err(HostError::HostNameUnavailable { errno: 0 });
    }
    String::from_utf8(buf[..end].to_vec()).map_err(|e| {
        warn!(bytes = ?e.as_bytes(), "hostname is not valid UTF-8");
        HostError::HostNameUnavailable { errno: 0 }
    })
}

/// Run `program` with `args`, returning trimmed stdout.
///
/// stdin is detached: the host's own stdin carries protocol frames.
pub fn run_command(program: &Path, args: &[&str]) -> Result<String, HostError> {
    let failed = |status: Option<i32>, stderr: String| HostError::CommandFailed {
        program: program.display().to_string(),
        status,
        stderr,
    };

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| failed(None, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(failed(output.status.code(), stderr));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
