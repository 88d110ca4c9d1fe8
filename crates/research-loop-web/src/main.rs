//! Research loop server: control API plus live progress over WebSocket.
//!
//! Backends are configured through the same environment variables as the
//! `research-loop` CLI.
//!
//! # Usage
//!
//! ```bash
//! RESEARCH_BACKEND_A_URL=... RESEARCH_BACKEND_B_URL=... cargo run -p research-loop-web
//! cargo run -p research-loop-web -- --port 8080 --surface-url http://127.0.0.1:3900
//! ```
//!
//! ## Starting a session
//!
//! **REST** (`POST /api/session`):
//! ```json
//! {"topic": "How do solid-state batteries fail?", "maxRounds": 3}
//! ```
//!
//! **WebSocket** (connect to `/ws`):
//! ```json
//! {"type": "start", "topic": "How do solid-state batteries fail?"}
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use research_loop::prelude::*;
use research_loop_web::{WebConfig, spawn_web};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Research loop server.
#[derive(Parser)]
#[command(about = "Multi-round research orchestrator with an HTTP control surface")]
struct Args {
    /// Port for the web server.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Base URL of the host surface bridge.
    #[arg(long, default_value = "http://127.0.0.1:3900")]
    surface_url: String,

    /// Seconds between host surface polls.
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // 1. Backends and pipeline from the environment.
    let pipeline = BackendConfig::from_env()?.build_pipeline(PipelineLimits::default())?;

    // 2. Host surface bridge.
    let surface = HttpSurface::new(&args.surface_url)?;

    // 3. Controller, with session events logged.
    let config = LoopConfig::default().poll_interval(Duration::from_secs(args.poll_secs.max(1)));
    let controller = SessionController::new(Arc::new(surface), pipeline, config);
    controller.subscribe(Arc::new(LoggingHandler));

    // 4. Web server.
    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
        ..Default::default()
    };
    let addr = spawn_web(controller.clone(), web_config).await?;
    println!("Control API: http://{addr}/api/session");
    println!("Progress relay: ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for ctrl-c: {e}"))?;
    if controller.get_session().is_some() {
        let _ = controller.cancel().await;
    }
    Ok(())
}
