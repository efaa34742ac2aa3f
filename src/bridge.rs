//! The content-script side: ask the relay once, publish into the page world.
//!
//! Content scripts share the page's DOM but not its globals, so the value is
//! handed over by appending a one-line script element and removing it again.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::relay::{RelayError, RequestEnvelope};

/// Send a message to the extension runtime and await the single reply.
#[async_trait]
pub trait ExtensionMessaging: Send + Sync {
    async fn send_message(&self, message: Value) -> Result<Value, RelayError>;
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no extension runtime messaging API is available")]
    NoExtensionRuntime,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("runtime did not reply within {0} ms")]
    TimedOut(u64),
}

/// The two equivalent runtime entry points a content script may find.
#[derive(Clone, Default)]
pub struct ExtensionGlobals {
    pub browser: Option<Arc<dyn ExtensionMessaging>>,
    pub chrome: Option<Arc<dyn ExtensionMessaging>>,
}

impl ExtensionGlobals {
    pub fn browser(api: Arc<dyn ExtensionMessaging>) -> Self {
        Self {
            browser: Some(api),
            chrome: None,
        }
    }

    pub fn chrome(api: Arc<dyn ExtensionMessaging>) -> Self {
        Self {
            browser: None,
            chrome: Some(api),
        }
    }

    /// `browser` if present, else `chrome`.
    pub fn messaging(&self) -> Option<Arc<dyn ExtensionMessaging>> {
        self.browser.clone().or_else(|| self.chrome.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionPoint {
    Head,
    DocumentElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptId(pub u64);

/// The slice of the DOM the bridge needs.
pub trait PageDocument {
    fn has_head(&self) -> bool;

    /// Append a script element with `text` under `parent`. The page world
    /// runs it as part of insertion.
    fn append_script(&mut self, parent: InsertionPoint, text: &str) -> ScriptId;

    fn remove_script(&mut self, id: ScriptId);
}

/// `window.<global>=<json>;`
pub fn publish_statement(global: &str, value: Option<&str>) -> String {
    let literal = match value {
        Some(s) => Value::String(s.to_owned()).to_string(),
        None => Value::Null.to_string(),
    };
    format!("window.{global}={literal};")
}

/// Run `statement` in the page world via a transient script element.
pub fn inject_statement<D: PageDocument + ?Sized>(doc: &mut D, statement: &str) {
    let parent = if doc.has_head() {
        InsertionPoint::Head
    } else {
        InsertionPoint::DocumentElement
    };
    let id = doc.append_script(parent, statement);
    doc.remove_script(id);
}

/// Reply to `Option<String>`: only a JSON string counts as a value.
fn reply_to_value(reply: Value) -> Option<String> {
    match reply {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => {
            warn!(reply = %other, "unexpected reply shape");
            None
        }
    }
}

pub struct ContentBridge {
    globals: ExtensionGlobals,
    config: BridgeConfig,
}

impl ContentBridge {
    pub fn new(globals: ExtensionGlobals, config: BridgeConfig) -> Self {
        Self { globals, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    async fn try_request(&self) -> Result<Value, BridgeError> {
        let api = self.globals.messaging().ok_or(BridgeError::NoExtensionRuntime)?;
        let request = RequestEnvelope::new(self.config.request_type.clone()).to_value();
        tokio::time::timeout(self.config.relay_timeout(), api.send_message(request))
            .await
            .map_err(|_| BridgeError::TimedOut(self.config.relay_timeout_ms))?
            .map_err(BridgeError::from)
    }

    /// Send exactly one request and resolve it to a value or `None`.
    pub async fn request_value(&self) -> Option<String> {
        match self.try_request().await {
            Ok(reply) => reply_to_value(reply),
            Err(e) => {
                warn!(error = %e, "hostname request failed");
                None
            }
        }
    }

    /// One page load: request, then publish into `doc`. Returns what was published.
    pub async fn run<D: PageDocument + ?Sized>(&self, doc: &mut D) -> Option<String> {
        debug!(request_type = %self.config.request_type, "content bridge loaded");
        let value = self.request_value().await;
        let statement = publish_statement(&self.config.global_name, value.as_deref());
        inject_statement(doc, &statement);
        info!(global = %self.config.global_name, value = ?value, "published page global");
        value
    }
}
