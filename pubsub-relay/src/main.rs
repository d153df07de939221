mod config;
mod error;
mod relay;

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Relay stdin lines to a topic while printing messages from a subscription.
#[derive(Parser)]
#[command(name = "pubsub-relay", version)]
struct Cli {
    /// Account user name
    username: String,
    /// Account password
    password: String,
    /// Subscription to consume (created server-side on first use)
    subscription: String,
    /// YAML config file with topics, identity, and timeouts
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Control-plane endpoint, overriding the config file
    #[arg(long, env = "PUBSUB_ENDPOINT")]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match relay::run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    // Exit without runtime shutdown: a pending stdin read holds a blocking
    // thread that would otherwise keep the process alive.
    std::process::exit(code);
}
