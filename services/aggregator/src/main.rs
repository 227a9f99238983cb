// aggregator: Aggregates live chat from Twitch and Niconico into one
// normalized JSON event stream on stdout.

use clap::Parser;
use tracing::info;

use aggregator::events::EventSender;
use aggregator::supervisor::{self, SupervisorConfig};

/// Aggregate live chat comments into one normalized event stream.
#[derive(Debug, Parser)]
#[command(name = "aggregator", version)]
struct Args {
    /// Broadcast ids (lv...), watch URLs, or Twitch channel names.
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stderr, so
    // stdout stays a clean event stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "aggregator starting");

    let (events, mut host_rx) = EventSender::channel();
    let (sup, sup_task) = supervisor::spawn(events, SupervisorConfig::default());

    for input in &args.inputs {
        sup.connect(input);
    }

    let mut shutting_down = false;
    loop {
        tokio::select! {
            event = host_rx.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!(error = %e, "event serialize"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !shutting_down => {
                info!("shutting down");
                shutting_down = true;
                sup.disconnect(None);
            }
        }
    }

    let _ = sup_task.await;
    info!("aggregator stopped");
}
