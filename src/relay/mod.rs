//! The background/runtime relay.
//!
//! A [`Runtime`] delivers each content message to every registered listener.
//! A listener that intends to answer later must return
//! [`ListenerResponse::WillRespondAsync`]; otherwise the reply channel is
//! closed as soon as dispatch finishes and the sender sees
//! [`RelayError::NoResponse`].

pub mod native_port;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::bridge::ExtensionMessaging;
use crate::config::BridgeConfig;
use crate::host::NmError;
use crate::native::Operation;

pub use native_port::{InProcessNativeMessaging, NativeMessaging, ProcessNativeMessaging};

#[derive(Debug, Error)]
pub enum RelayError {
    /// No listener answered, or every listener dropped its responder.
    #[error("the message channel closed before a response was received")]
    NoResponse,

    #[error("specified native messaging host not found: {0}")]
    HostNotFound(String),

    #[error("failed to start native messaging host: {0}")]
    Spawn(#[source] io::Error),

    #[error("native host {0} pipe unavailable")]
    PipeUnavailable(&'static str),

    #[error("native messaging transport failed: {0}")]
    Transport(#[from] NmError),

    #[error("native host reply is not JSON: {0}")]
    MalformedReply(#[source] serde_json::Error),
}

/// `{ "type": <kind>, "payload"?: ... }` exchanged between content and runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut v = json!({ "type": self.kind });
        if let Some(payload) = &self.payload {
            v["payload"] = payload.clone();
        }
        v
    }

    /// `message?.type` for an arbitrary incoming message.
    pub fn kind_of(message: &Value) -> Option<&str> {
        message.get("type").and_then(Value::as_str)
    }
}

/// What a listener tells the runtime after seeing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerResponse {
    /// Not ours, or already answered synchronously.
    Ignored,
    /// Keep the channel open; a [`Responder`] clone will answer later.
    WillRespondAsync,
}

/// Shared reply slot for one message. The first `respond` wins.
#[derive(Debug, Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl Responder {
    fn new(tx: oneshot::Sender<Value>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    fn take(&self) -> Option<oneshot::Sender<Value>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Deliver `value`. Returns `false` if the channel was already answered or closed.
    pub fn respond(&self, value: Value) -> bool {
        match self.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.take();
    }
}

pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Value, responder: Responder) -> ListenerResponse;
}

impl<F> MessageListener for F
where
    F: Fn(&Value, Responder) -> ListenerResponse + Send + Sync,
{
    fn on_message(&self, message: &Value, responder: Responder) -> ListenerResponse {
        self(message, responder)
    }
}

/// Extension runtime message bus.
#[derive(Clone, Default)]
pub struct Runtime {
    listeners: Vec<Arc<dyn MessageListener>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<L: MessageListener + 'static>(&mut self, listener: L) -> &mut Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Dispatch `message` to every listener and await the first reply.
    pub async fn dispatch(&self, message: Value) -> Result<Value, RelayError> {
        let (tx, rx) = oneshot::channel();
        let responder = Responder::new(tx);

        let mut keep_open = false;
        for listener in &self.listeners {
            if listener.on_message(&message, responder.clone()) == ListenerResponse::WillRespondAsync {
                keep_open = true;
            }
        }
        if !keep_open {
            responder.close();
        }
        drop(responder);

        rx.await.map_err(|_| RelayError::NoResponse)
    }
}

#[async_trait]
impl ExtensionMessaging for Runtime {
    async fn send_message(&self, message: Value) -> Result<Value, RelayError> {
        self.dispatch(message).await
    }
}

/// Ask the native host for `op` and pull its result field out of the reply.
///
/// Every failure is logged and becomes `None`.
pub async fn fetch_native_value(
    native: &dyn NativeMessaging,
    config: &BridgeConfig,
    op: Operation,
) -> Option<String> {
    let request = json!(op.descriptor());
    let call = native.send_native_message(&config.native_host_id, request);

    let reply = match tokio::time::timeout(config.native_timeout(), call).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            error!(error = %e, host_id = %config.native_host_id, %op, "native error");
            return None;
        }
        Err(_) => {
            warn!(
                host_id = %config.native_host_id,
                %op,
                timeout_ms = config.native_timeout_ms,
                "native host did not reply in time"
            );
            return None;
        }
    };

    match reply.get(op.result_field()).and_then(Value::as_str) {
        Some(value) => Some(value.to_owned()),
        None => {
            match reply.get("error") {
                Some(code) => warn!(%op, error = %code, "native host reported failure"),
                None => warn!(%op, reply = %reply, "native reply missing result field"),
            }
            None
        }
    }
}

/// Answers `NEED_HOSTNAME` (or the configured request type) with the bare
/// hostname string or `null`.
pub struct HostnameListener {
    native: Arc<dyn NativeMessaging>,
    config: Arc<BridgeConfig>,
}

impl HostnameListener {
    pub fn new(native: Arc<dyn NativeMessaging>, config: Arc<BridgeConfig>) -> Self {
        Self { native, config }
    }
}

impl MessageListener for HostnameListener {
    fn on_message(&self, message: &Value, responder: Responder) -> ListenerResponse {
        if RequestEnvelope::kind_of(message) != Some(self.config.request_type.as_str()) {
            return ListenerResponse::Ignored;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "no async runtime to relay on");
                responder.respond(Value::Null);
                return ListenerResponse::Ignored;
            }
        };

        let native = Arc::clone(&self.native);
        let config = Arc::clone(&self.config);
        handle.spawn(async move {
            let host_name = fetch_native_value(&*native, &config, Operation::GetHostname).await;
            debug!(?host_name, "relaying hostname");
            responder.respond(host_name.map_or(Value::Null, Value::String));
        });

        ListenerResponse::WillRespondAsync
    }
}
