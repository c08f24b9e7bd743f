//! Call server backed by the in-process media engine
//!
//! Run with: cargo run --example memory_call_server [SIGNALING_ADDR] [HTTP_ADDR] [OUTPUT_DIR]
//!
//! Examples:
//!   cargo run --example memory_call_server                              # 0.0.0.0:8000 and 0.0.0.0:8080
//!   cargo run --example memory_call_server 127.0.0.1:9000 127.0.0.1:9080
//!   cargo run --example memory_call_server 0.0.0.0:8000 0.0.0.0:8080 /tmp/hls
//!
//! The memory engine negotiates signaling but carries no media, so the
//! transcoder waits on ports nobody sends to. It is useful for driving the
//! signaling flow from a browser or a WebSocket client:
//!
//!   {"v":1,"id":1,"method":"get-capabilities"}
//!   {"v":1,"id":2,"method":"create-transport","params":{"role":"ingress"}}
//!
//! Live streams are listed at `GET /streams` and served from
//! `GET /stream/<id>/manifest`.

use std::net::SocketAddr;
use std::sync::Arc;

use callcast::engine::MemoryEngine;
use callcast::{CallEvent, CallServer, ServerConfig};

fn print_usage() {
    eprintln!("Usage: memory_call_server [SIGNALING_ADDR] [HTTP_ADDR] [OUTPUT_DIR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  SIGNALING_ADDR  WebSocket bind address (default: 0.0.0.0:8000)");
    eprintln!("  HTTP_ADDR       HLS file server bind address (default: 0.0.0.0:8080)");
    eprintln!("  OUTPUT_DIR      Directory streams are written under (default: ./hls)");
}

fn parse_addr(arg: Option<&String>, default: SocketAddr) -> Result<SocketAddr, String> {
    match arg {
        Some(s) => s
            .parse()
            .map_err(|e| format!("Invalid address '{}': {}", s, e)),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let defaults = ServerConfig::default();
    let (signaling_addr, http_addr) = match (
        parse_addr(args.get(1), defaults.signaling_addr),
        parse_addr(args.get(2), defaults.http_addr),
    ) {
        (Ok(signaling), Ok(http)) => (signaling, http),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callcast=debug".parse()?)
                .add_directive("memory_call_server=debug".parse()?),
        )
        .init();

    let mut config = defaults.signaling(signaling_addr).http(http_addr);
    if let Some(dir) = args.get(3) {
        config = config.output_root(dir);
    }

    println!("Signaling: ws://{}", config.signaling_addr);
    println!("HLS:       http://{}/streams", config.http_addr);
    println!();

    let server = CallServer::new(config, Arc::new(MemoryEngine::new()));

    let mut events = server.handler().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CallEvent::PeerJoined { peer, counterpart } => {
                    println!("Peers {} and {} paired", peer, counterpart);
                }
                CallEvent::PeerLeft { peer } => println!("Peer {} left", peer),
                CallEvent::ExportStarted { stream_id, .. } => {
                    println!("Stream {} started", stream_id);
                }
                CallEvent::ExportFailed { stream_id, reason } => {
                    println!("Stream {} failed: {}", stream_id, reason);
                }
                CallEvent::ExportExited { stream_id, code } => {
                    println!("Stream {} exited ({:?})", stream_id, code);
                }
            }
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
