//! Run one research session against a host surface bridge.
//!
//! Backends are configured through environment variables
//! (`RESEARCH_BACKEND_A_URL`, `RESEARCH_BACKEND_B_URL`, their `_KEY` and
//! `_MODEL` variants, and `BRAVE_SEARCH_KEY` for web evidence).
//!
//! # Examples
//!
//! ```sh
//! # Five automatic rounds
//! research-loop "How do solid-state batteries degrade?"
//!
//! # Three rounds, review each follow-up before it is sent
//! research-loop --max-rounds 3 --manual "Tidal energy economics"
//!
//! # Custom bridge and report path
//! research-loop --surface-url http://127.0.0.1:4000 --output report.md "Topic"
//! ```
//!
//! Ctrl-C cancels the session and still writes the partial report. In
//! manual mode, press Enter to send each pending follow-up.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use research_loop::prelude::*;
use research_loop::report::export_report;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run one multi-round research session.
#[derive(Parser)]
#[command(name = "research-loop")]
struct Cli {
    /// Research topic sent as the first question
    topic: String,

    /// Number of research rounds
    #[arg(long, default_value_t = 5)]
    max_rounds: u32,

    /// Wait for Enter before each follow-up is submitted
    #[arg(long)]
    manual: bool,

    /// External session identifier (generated when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Base URL of the host surface bridge
    #[arg(long, default_value = "http://127.0.0.1:3900")]
    surface_url: String,

    /// Seconds between host surface polls
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,

    /// Give up on a round after this many seconds without a report
    #[arg(long)]
    research_timeout_secs: Option<u64>,

    /// Where to write the report (default: research-<session>.md, `-` for stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

enum Signal {
    StateChanged(SessionState),
    Finished,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished,
    Interrupted,
}

/// Wait for the session to finish, reading Enter as confirmation while a
/// follow-up is under review. The interrupt future is created once, so a
/// Ctrl-C is seen even while the prompt is waiting for input.
async fn drive<R, I, C, F>(
    rx: &mut mpsc::UnboundedReceiver<Signal>,
    lines: &mut Lines<R>,
    interrupt: I,
    mut confirm: C,
) -> Outcome
where
    R: AsyncBufRead + Unpin,
    I: Future,
    C: FnMut() -> F,
    F: Future<Output = Result<(), ControllerError>>,
{
    tokio::pin!(interrupt);
    let mut awaiting_confirm = false;
    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Finished) | None => return Outcome::Finished,
                Some(Signal::StateChanged(state)) => {
                    awaiting_confirm = state == SessionState::WaitingConfirm;
                    if awaiting_confirm {
                        eprintln!("Follow-up inserted. Press Enter to send it, Ctrl-C to cancel.");
                    }
                }
            },
            line = lines.next_line(), if awaiting_confirm => {
                awaiting_confirm = false;
                match line {
                    Ok(Some(_)) => {
                        if let Err(e) = confirm().await {
                            eprintln!("Warning: {e}");
                        }
                    }
                    _ => eprintln!("Input closed. Press Ctrl-C to cancel the session."),
                }
            }
            _ = &mut interrupt => return Outcome::Interrupted,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let backends = match BackendConfig::from_env() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let pipeline = match backends.build_pipeline(PipelineLimits::default()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: failed to build analysis pipeline: {e}");
            process::exit(1);
        }
    };
    let surface = match HttpSurface::new(&cli.surface_url) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to create surface client: {e}");
            process::exit(1);
        }
    };

    let config = LoopConfig::default()
        .poll_interval(Duration::from_secs(cli.poll_secs.max(1)))
        .research_timeout(cli.research_timeout_secs.map(Duration::from_secs));
    let controller = SessionController::new(Arc::new(surface), pipeline, config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.subscribe(Arc::new(
        CompositeEventHandler::new()
            .with(LoggingHandler)
            .with(FnEventHandler::new(move |event: &SessionEvent<'_>| {
                let signal = match event {
                    SessionEvent::StateChanged { to, .. } => Signal::StateChanged(*to),
                    SessionEvent::Finished { .. } => Signal::Finished,
                    _ => return,
                };
                let _ = tx.send(signal);
            })),
    ));

    let options = StartOptions::default()
        .max_rounds(cli.max_rounds)
        .auto_mode(!cli.manual);
    let snapshot = match controller.start(&cli.topic, options, cli.session_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let session_id = snapshot.session_id;
    eprintln!("Session {session_id} started ({} round(s))", cli.max_rounds);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let outcome = drive(
        &mut rx,
        &mut stdin,
        tokio::signal::ctrl_c(),
        || controller.confirm_and_proceed(),
    )
    .await;
    let report = match outcome {
        Outcome::Finished => controller.generate_report(),
        Outcome::Interrupted => {
            eprintln!("Cancelling...");
            controller
                .cancel()
                .await
                .unwrap_or_else(|_| controller.generate_report())
        }
    };

    let path = cli
        .output
        .unwrap_or_else(|| PathBuf::from(format!("research-{session_id}.md")));
    if path.as_os_str() == "-" {
        println!("{report}");
        return;
    }
    if let Err(e) = export_report(&path, &report) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
    eprintln!("Report written to {}", path.display());
}
