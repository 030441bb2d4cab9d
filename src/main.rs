use std::sync::Arc;

use mcp_runtime::config::ServerConfig;
use mcp_runtime::framing::Framer;
use mcp_runtime::server::McpServer;
use mcp_runtime::transport::StreamTransport;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-runtime-stdio: configuration error: {e}");
            std::process::exit(1);
        }
    };

    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("MCP_LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    let framer = Framer::new(config.framing).with_max_message_bytes(config.max_message_bytes);
    let transport = Arc::new(StreamTransport::with_framer(
        tokio::io::stdin(),
        tokio::io::stdout(),
        framer,
    ));

    let server = Arc::new(McpServer::new(config));
    if let Err(e) = server.serve(transport).await {
        tracing::error!(error = %e, "fatal transport error");
        std::process::exit(1);
    }
}
