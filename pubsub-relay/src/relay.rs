use async_trait::async_trait;
use pubsub_session::{
    BoxError, Credential, CredentialManager, Envelope, GrpcConnector, LineSource, OutboundSource,
    Session,
};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Cli;
use crate::config;
use crate::error::RelayResult;

pub async fn run(cli: Cli) -> RelayResult<()> {
    let mut config = config::load(cli.config.as_deref()).await?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    let session_config = config.session_config(&cli.subscription)?;

    let connector = GrpcConnector::new(&config.endpoint, config.request_timeout())?;
    let credentials =
        CredentialManager::new(connector, Credential::new(cli.username, cli.password));
    info!(
        endpoint = %config.endpoint,
        publisher = %session_config.publisher_name,
        outgoing_topic = %session_config.outgoing_topic,
        "starting relay"
    );
    let session = Session::new(credentials, session_config);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    println!("Write a message to send:");
    let source = EchoSource(LineSource::new(BufReader::new(tokio::io::stdin())));
    session.run(print_envelope, source, shutdown).await?;
    Ok(())
}

fn print_envelope(envelope: &Envelope) -> Result<(), BoxError> {
    println!("received: '{}'", envelope.payload_text());
    Ok(())
}

/// Echoes each outbound payload before it is published.
struct EchoSource<S>(S);

#[async_trait]
impl<S: OutboundSource> OutboundSource for EchoSource<S> {
    async fn next_message(&mut self) -> pubsub_session::Result<Option<Vec<u8>>> {
        let next = self.0.next_message().await?;
        if let Some(payload) = &next {
            println!("sending: '{}'", String::from_utf8_lossy(payload));
        }
        Ok(next)
    }
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, shutting down");
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, shutting down");
            }
        }
        shutdown.cancel();
    });
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
