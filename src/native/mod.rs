//! The native host core: one Operation Descriptor in, one Result Payload out.
//!
//! [`NativeHost::handle`] is a pure function of its input and the injected
//! [`SystemApi`]. The stdio binary is a thin adapter around it.

pub mod system;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::host::{Frame, MAX_TO_BROWSER};

pub use system::{run_command, OsSystem, SystemApi, HOSTNAME_BUF_LEN};

const UNAME_PATH: &str = "/usr/bin/uname";

/// Operations the host will execute. Anything else is `UnknownOperation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    GetHostname,
    GetKernelInfo,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::GetHostname, Operation::GetKernelInfo];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GetHostname => "getHostname",
            Operation::GetKernelInfo => "getKernelInfo",
        }
    }

    /// Key carrying the value in a success payload.
    pub fn result_field(self) -> &'static str {
        match self {
            Operation::GetHostname => "hostName",
            Operation::GetKernelInfo => "kernelInfo",
        }
    }

    pub fn descriptor(self) -> OperationDescriptor {
        OperationDescriptor { op: self }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ "op": "<operation>" }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub op: Operation,
}

/// Error codes that reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostErrorCode {
    InvalidPayload,
    UnknownOperation,
    HostNameUnavailable,
    CommandFailed,
}

impl HostErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            HostErrorCode::InvalidPayload => "InvalidPayload",
            HostErrorCode::UnknownOperation => "UnknownOperation",
            HostErrorCode::HostNameUnavailable => "HostNameUnavailable",
            HostErrorCode::CommandFailed => "CommandFailed",
        }
    }
}

impl fmt::Display for HostErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure inside the host, with diagnostics that are logged but never sent.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid or missing payload")]
    InvalidPayload,

    #[error("unknown or missing operation: {}", .0.as_deref().unwrap_or("<none>"))]
    UnknownOperation(Option<String>),

    #[error("gethostname failed with errno {errno}")]
    HostNameUnavailable { errno: i32 },

    #[error("command {program} failed (status {status:?}): {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{op} reply of {len} bytes exceeds {max} bytes")]
    ReplyTooLarge { op: Operation, len: usize, max: usize },
}

impl HostError {
    pub fn code(&self) -> HostErrorCode {
        match self {
            HostError::InvalidPayload => HostErrorCode::InvalidPayload,
            HostError::UnknownOperation(_) => HostErrorCode::UnknownOperation,
            HostError::HostNameUnavailable { .. } => HostErrorCode::HostNameUnavailable,
            HostError::CommandFailed { .. } | HostError::ReplyTooLarge { .. } => {
                HostErrorCode::CommandFailed
            }
        }
    }
}

/// Exactly one of `{ <field>: value }` or `{ "error": code }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPayload {
    Success { field: &'static str, value: String },
    Error(HostErrorCode),
}

impl ResultPayload {
    pub fn success(op: Operation, value: String) -> Self {
        ResultPayload::Success {
            field: op.result_field(),
            value,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(1);
        match self {
            ResultPayload::Success { field, value } => {
                map.insert((*field).to_string(), Value::String(value.clone()));
            }
            ResultPayload::Error(code) => {
                map.insert("error".to_string(), Value::String(code.as_str().to_string()));
            }
        }
        Value::Object(map)
    }
}

impl From<HostError> for ResultPayload {
    fn from(e: HostError) -> Self {
        ResultPayload::Error(e.code())
    }
}

impl Serialize for ResultPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            ResultPayload::Success { field, value } => map.serialize_entry(field, value)?,
            ResultPayload::Error(code) => map.serialize_entry("error", code)?,
        }
        map.end()
    }
}

fn parse_operation(payload: &Map<String, Value>) -> Result<Operation, HostError> {
    let tag = payload.get("op");
    tag.and_then(|v| Operation::deserialize(v).ok())
        .ok_or_else(|| HostError::UnknownOperation(tag.map(Value::to_string)))
}

/// Executes whitelisted operations against the OS.
#[derive(Debug, Clone, Default)]
pub struct NativeHost<S = OsSystem> {
    system: S,
}

impl NativeHost<OsSystem> {
    pub fn new() -> Self {
        Self { system: OsSystem }
    }
}

impl<S: SystemApi> NativeHost<S> {
    pub fn with_system(system: S) -> Self {
        Self { system }
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// Handle the sole input item of one invocation.
    ///
    /// `None` means the invocation carried no input item at all.
    pub fn handle(&self, input: Option<&Value>) -> ResultPayload {
        match self.try_handle(input) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, code = %e.code(), "native request failed");
                e.into()
            }
        }
    }

    /// Handle an undecoded frame body. Undecodable JSON is `InvalidPayload`.
    pub fn handle_raw(&self, raw: &str) -> ResultPayload {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.handle(Some(&value)),
            Err(e) => {
                warn!(error = %e, "request body is not JSON");
                ResultPayload::Error(HostErrorCode::InvalidPayload)
            }
        }
    }

    /// Handle one frame from the stdio loop.
    pub fn handle_frame(&self, frame: Frame) -> ResultPayload {
        match frame {
            Ok(raw) => self.handle_raw(&raw),
            Err(e) => {
                warn!(error = %e, "request frame rejected");
                ResultPayload::Error(HostErrorCode::InvalidPayload)
            }
        }
    }

    pub fn dispatch(&self, op: Operation) -> Result<ResultPayload, HostError> {
        let value = match op {
            Operation::GetHostname => self.system.hostname()?,
            Operation::GetKernelInfo => self.system.run_command(Path::new(UNAME_PATH), &["-a"])?,
        };
        let payload = ResultPayload::success(op, value);

        // The frame writer refuses anything larger, which would leave this
        // invocation without a reply.
        let len = payload.to_value().to_string().len();
        if len > MAX_TO_BROWSER {
            return Err(HostError::ReplyTooLarge {
                op,
                len,
                max: MAX_TO_BROWSER,
            });
        }
        debug!(%op, len, "operation succeeded");
        Ok(payload)
    }

    fn try_handle(&self, input: Option<&Value>) -> Result<ResultPayload, HostError> {
        let payload = input
            .and_then(Value::as_object)
            .ok_or(HostError::InvalidPayload)?;
        let op = parse_operation(payload)?;
        self.dispatch(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedHost(&'static str);

    impl SystemApi for FixedHost {
        fn hostname(&self) -> Result<String, HostError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn operation_tags_match_wire_names() {
        for op in Operation::ALL {
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
            let back: Operation = serde_json::from_value(json!(op.as_str())).unwrap();
            assert_eq!(back, op);
        }
    }

    #[test]
    fn descriptor_serializes_as_op_object() {
        let d = Operation::GetHostname.descriptor();
        assert_eq!(serde_json::to_value(d).unwrap(), json!({"op": "getHostname"}));
    }

    #[test]
    fn op_tag_is_case_sensitive() {
        let host = NativeHost::with_system(FixedHost("h"));
        let reply = host.handle(Some(&json!({"op": "GetHostname"})));
        assert_eq!(reply, ResultPayload::Error(HostErrorCode::UnknownOperation));
    }

    #[test]
    fn non_string_op_is_unknown() {
        let host = NativeHost::with_system(FixedHost("h"));
        let reply = host.handle(Some(&json!({"op": 7})));
        assert_eq!(reply.to_value(), json!({"error": "UnknownOperation"}));
    }

    #[test]
    fn serialize_matches_to_value() {
        let ok = ResultPayload::success(Operation::GetHostname, "x".into());
        let err = ResultPayload::Error(HostErrorCode::CommandFailed);
        assert_eq!(serde_json::to_value(&ok).unwrap(), ok.to_value());
        assert_eq!(serde_json::to_value(&err).unwrap(), err.to_value());
    }

    #[test]
    fn internal_diagnostics_stay_internal() {
        let e = HostError::CommandFailed {
            program: "/usr/bin/uname".into(),
            status: Some(1),
            stderr: "secret detail".into(),
        };
        let payload: ResultPayload = e.into();
        assert_eq!(payload.to_value(), json!({"error": "CommandFailed"}));
    }

    struct ChattyCommand(usize);

    impl SystemApi for ChattyCommand {
        fn hostname(&self) -> Result<String, HostError> {
            Ok("h".to_string())
        }

        fn run_command(&self, _program: &Path, _args: &[&str]) -> Result<String, HostError> {
            Ok("x".repeat(self.0))
        }
    }

    #[test]
    fn reply_over_browser_limit_becomes_command_failed() {
        let host = NativeHost::with_system(ChattyCommand(MAX_TO_BROWSER));
        let err = host.dispatch(Operation::GetKernelInfo).unwrap_err();
        assert!(matches!(err, HostError::ReplyTooLarge { len, .. } if len > MAX_TO_BROWSER));

        let reply = host.handle(Some(&json!({"op": "getKernelInfo"})));
        assert_eq!(reply, ResultPayload::Error(HostErrorCode::CommandFailed));
    }

    #[test]
    fn reply_at_browser_limit_is_sent() {
        // `{"kernelInfo":"..."}` adds 17 bytes around the value.
        let host = NativeHost::with_system(ChattyCommand(MAX_TO_BROWSER - 17));
        let reply = host.handle(Some(&json!({"op": "getKernelInfo"})));
        assert_eq!(reply.to_value().to_string().len(), MAX_TO_BROWSER);
        assert!(matches!(reply, ResultPayload::Success { field: "kernelInfo", .. }));
    }
}
