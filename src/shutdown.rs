use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Coordinates shutdown between the background loops: every loop gets a clone
/// of the token and exits when it is cancelled.
pub struct Shutdown {
    token: CancellationToken,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Blocks until SIGINT/SIGTERM arrives or some task cancels the token,
    /// then cancels it so every loop winds down.
    pub async fn wait(&self) -> anyhow::Result<()> {
        let mut sigint_sink =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        let mut sigterm_sink =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        select! {
            _ = self.token.cancelled() => {
                info!("Shutdown requested by a task");
            }
            _ = sigint_sink.recv() => {
                info!("Received SIGINT, probably Ctrl+C was pressed");
            }
            _ = sigterm_sink.recv() => {
                info!("Received SIGTERM, probably systemd is stopping us");
            }
        }

        self.token.cancel();
        Ok(())
    }
}
