#![allow(dead_code)]

use async_trait::async_trait;
use hostname_bridge::bridge::{ContentBridge, ExtensionGlobals, InsertionPoint, PageDocument, ScriptId};
use hostname_bridge::config::BridgeConfig;
use hostname_bridge::host::{decode_message, MAX_FROM_BROWSER};
use hostname_bridge::native::{run_command, HostError, NativeHost, SystemApi};
use hostname_bridge::relay::{
    HostnameListener, InProcessNativeMessaging, NativeMessaging, RelayError, Runtime,
};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// `SystemApi` with a scripted hostname result.
pub struct FakeSystem {
    hostname: Result<String, i32>,
    command_output: Option<String>,
    calls: AtomicUsize,
}

impl FakeSystem {
    pub fn named(name: &str) -> Self {
        Self {
            hostname: Ok(name.to_string()),
            command_output: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(errno: i32) -> Self {
        Self {
            hostname: Err(errno),
            command_output: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every `run_command` with `output` instead of running it.
    pub fn with_command_output(mut self, output: impl Into<String>) -> Self {
        self.command_output = Some(output.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SystemApi for FakeSystem {
    fn hostname(&self) -> Result<String, HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hostname
            .clone()
            .map_err(|errno| HostError::HostNameUnavailable { errno })
    }

    fn run_command(&self, program: &Path, args: &[&str]) -> Result<String, HostError> {
        match &self.command_output {
            Some(output) => Ok(output.clone()),
            None => run_command(program, args),
        }
    }
}

/// Native port that never answers.
pub struct HungNative;

#[async_trait]
impl NativeMessaging for HungNative {
    async fn send_native_message(&self, _host_id: &str, _message: Value) -> Result<Value, RelayError> {
        std::future::pending().await
    }
}

/// Native port that answers with a fixed reply.
pub struct CannedNative(pub Value);

#[async_trait]
impl NativeMessaging for CannedNative {
    async fn send_native_message(&self, _host_id: &str, _message: Value) -> Result<Value, RelayError> {
        Ok(self.0.clone())
    }
}

pub fn in_process<S: SystemApi + 'static>(system: S) -> Arc<dyn NativeMessaging> {
    Arc::new(InProcessNativeMessaging::new(
        BridgeConfig::default().native_host_id,
        NativeHost::with_system(system),
    ))
}

pub fn runtime_over(native: Arc<dyn NativeMessaging>, config: &BridgeConfig) -> Runtime {
    let mut runtime = Runtime::new();
    runtime.add_listener(HostnameListener::new(native, Arc::new(config.clone())));
    runtime
}

/// Content bridge -> runtime -> `native`, all with `config`.
pub fn bridge_over(native: Arc<dyn NativeMessaging>, config: BridgeConfig) -> ContentBridge {
    let runtime = runtime_over(native, &config);
    ContentBridge::new(ExtensionGlobals::browser(Arc::new(runtime)), config)
}

/// In-memory DOM whose page world understands `window.<name>=<json>;`.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    head: bool,
    next_id: u64,
    pub attached: Vec<(ScriptId, InsertionPoint, String)>,
    pub executed: Vec<(InsertionPoint, String)>,
    pub globals: HashMap<String, Value>,
}

impl MemoryDocument {
    pub fn with_head() -> Self {
        Self {
            head: true,
            ..Self::default()
        }
    }

    pub fn without_head() -> Self {
        Self::default()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn run_in_page(&mut self, text: &str) {
        let body = text
            .strip_prefix("window.")
            .and_then(|s| s.strip_suffix(';'))
            .expect("window assignment statement");
        let (name, literal) = body.split_once('=').expect("assignment");
        let value: Value = serde_json::from_str(literal).expect("JSON literal");
        self.globals.insert(name.to_string(), value);
    }
}

impl PageDocument for MemoryDocument {
    fn has_head(&self) -> bool {
        self.head
    }

    fn append_script(&mut self, parent: InsertionPoint, text: &str) -> ScriptId {
        self.next_id += 1;
        let id = ScriptId(self.next_id);
        self.attached.push((id, parent, text.to_string()));
        self.run_in_page(text);
        self.executed.push((parent, text.to_string()));
        id
    }

    fn remove_script(&mut self, id: ScriptId) {
        self.attached.retain(|(node, _, _)| *node != id);
    }
}

/// `Write` sink shared with the test after the writer task takes ownership.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    /// Decode every frame written so far.
    pub fn frames(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        let mut cur = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Ok(raw) = decode_message(&mut cur, MAX_FROM_BROWSER) {
            out.push(serde_json::from_str(&raw).expect("reply is JSON"));
        }
        out
    }
}
