//! # hostname_bridge
//!
//! Exposes the machine hostname to web pages through a browser extension,
//! using a three-hop relay:
//!
//! ```text
//! page world <- content bridge <-> runtime relay <-> native host <-> gethostname(2)
//! ```
//!
//! - [`native`]: the native messaging host core: one `{ "op": ... }` in,
//!   exactly one `{ "<field>": ... }` or `{ "error": ... }` out.
//! - [`host`]: framing + stdio helpers the host binary is built on.
//! - [`relay`]: the background/runtime side: message bus, listeners, and
//!   ways of reaching the native host.
//! - [`bridge`]: the content-script side: capability probing, the single
//!   request, and publication into the page world.
//! - [`config`]: embedded defaults and TOML overrides.
//!
//! ---
//!
//! ## Failure discipline
//!
//! Nothing crosses a hop as an error. The native host answers every input
//! with a well-formed payload; the relay turns every native failure
//! (unreachable host, malformed reply, error payload, timeout) into `null`;
//! the bridge publishes `window.__HOSTNAME=null;` when it gets anything but
//! a string. Diagnostics are logged with `tracing` where they are observed.
//!
//! ### Error codes from the native host
//!
//! | code                  | meaning                                       |
//! |-----------------------|-----------------------------------------------|
//! | `InvalidPayload`      | no input, not a JSON object, undecodable body |
//! | `UnknownOperation`    | `op` missing or not a known operation         |
//! | `HostNameUnavailable` | `gethostname(2)` failed                       |
//! | `CommandFailed`       | a subprocess exited non-zero                  |
//!
//! ---
//!
//! ## The native host core (runnable example)
//!
//! ```rust
//! use hostname_bridge::native::NativeHost;
//! use serde_json::json;
//!
//! let host = NativeHost::new();
//!
//! let reply = host.handle(Some(&json!({ "op": "getHostname" }))).to_value();
//! assert!(reply.get("hostName").is_some());
//! assert!(reply.get("error").is_none());
//!
//! let reply = host.handle(Some(&json!({ "op": "formatDisk" }))).to_value();
//! assert_eq!(reply, json!({ "error": "UnknownOperation" }));
//! ```
//!
//! ---
//!
//! ## Wiring the relay in-process
//!
//! ```rust
//! use std::sync::Arc;
//! use hostname_bridge::bridge::{ContentBridge, ExtensionGlobals};
//! use hostname_bridge::config::BridgeConfig;
//! use hostname_bridge::native::NativeHost;
//! use hostname_bridge::relay::{HostnameListener, InProcessNativeMessaging, Runtime};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = Arc::new(BridgeConfig::default());
//! let native = Arc::new(InProcessNativeMessaging::new(
//!     config.native_host_id.clone(),
//!     NativeHost::new(),
//! ));
//!
//! let mut runtime = Runtime::new();
//! runtime.add_listener(HostnameListener::new(native, Arc::clone(&config)));
//!
//! let bridge = ContentBridge::new(
//!     ExtensionGlobals::browser(Arc::new(runtime)),
//!     (*config).clone(),
//! );
//! let host_name = bridge.request_value().await;
//! assert!(host_name.is_some());
//! # }
//! ```
//!
//! ---
//!
//! ## The host binary
//!
//! `hostname-bridge-host` reads framed requests from stdin and writes one framed
//! reply per request to stdout until the browser closes stdin. Its manifest
//! `name` must equal [`config::BridgeConfig::native_host_id`].
//!
//! **Never log to stdout** in the host: it carries protocol frames. The binary
//! sends `tracing` output to stderr, filtered by `RUST_LOG`.

pub mod bridge;
pub mod config;
pub mod host;
pub mod native;
pub mod relay;

// -------- Host re-exports --------

#[doc(inline)]
pub use host::{decode_message, encode_message, event_loop, NmError};

// -------- Core re-exports --------

#[doc(inline)]
pub use bridge::{ContentBridge, ExtensionGlobals, ExtensionMessaging, PageDocument};
#[doc(inline)]
pub use config::BridgeConfig;
#[doc(inline)]
pub use native::{HostErrorCode, NativeHost, Operation, ResultPayload};
#[doc(inline)]
pub use relay::{HostnameListener, NativeMessaging, RequestEnvelope, Runtime};
