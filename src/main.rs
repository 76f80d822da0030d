mod audio;
mod carrier;
mod config;
mod error;
mod media;
mod orchestrator;
pub mod registry;
mod server;
mod setup;
mod speech;
mod tools;

use std::net::SocketAddr;
use std::sync::Arc;

use config::Config;
use orchestrator::Orchestrator;
use registry::CallRegistry;
use tools::ToolHandler;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--setup") => setup::run(),
        Some("--version") => println!("call-orchestrator {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(run());
        }
    }
}

fn print_usage() {
    println!("call-orchestrator {VERSION}");
    println!("Voice call orchestrator exposed as stdio tools");
    println!();
    println!("Usage: call-orchestrator [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --setup     Run interactive configuration wizard");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the HTTP/WS server and the stdio tool loop.");
}

async fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_orchestrator=info,tower_http=info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting call-orchestrator"
    );

    let host = config.server.host.clone();
    let port = config.server.port;

    let registry = CallRegistry::new();
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(config), registry));

    let app = server::router(server::AppState {
        orchestrator: orchestrator.clone(),
    });

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("Invalid server address");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    tracing::info!(%addr, "Listening");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server error");
    });

    let handler = ToolHandler::new(orchestrator);
    tools::run_stdio_loop(handler).await;
}
