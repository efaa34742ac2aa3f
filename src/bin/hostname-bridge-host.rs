//! Native messaging host executable registered with the browser.

use hostname_bridge::host;
use hostname_bridge::native::NativeHost;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    // stdout is the protocol channel.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    info!(version = env!("CARGO_PKG_VERSION"), "hostname bridge host started");

    let native = NativeHost::new();
    let result = host::event_loop(move |frame, send| {
        let reply = native.handle_frame(frame);
        async move { send.send(&reply).await }
    })
    .await;

    match result {
        Ok(()) => info!("browser disconnected, shutting down"),
        Err(e) => {
            error!(error = %e, "native messaging loop failed");
            std::process::exit(1);
        }
    }
}
