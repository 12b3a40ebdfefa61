use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::OpError;
use crate::platform::{ChannelId, QueuePanel, Render};
use crate::queue::matchmaker::Matchmaker;
use crate::queue::schema::{QueueRow, QueueStatusMessageRow};
use crate::time::format_duration;
use crate::Services;

#[derive(Debug)]
pub enum ActorMessage {
    Join {
        user_id: String,
        as_host: bool,
        rpc: oneshot::Sender<Result<(), OpError>>,
    },
    Leave {
        user_id: String,
        rpc: oneshot::Sender<Result<(), OpError>>,
    },
    Clear {
        rpc: oneshot::Sender<Result<(), OpError>>,
    },
    SetDeploymentTime {
        interval: Duration,
        rpc: oneshot::Sender<Result<DateTime<Utc>, OpError>>,
    },
    ToggleStrikeMode {
        rpc: oneshot::Sender<bool>,
    },
    SetPanel {
        channel: ChannelId,
        rpc: oneshot::Sender<Result<(), OpError>>,
    },
    NextGame {
        rpc: oneshot::Sender<DateTime<Utc>>,
    },
}

/// Hot Drop Queue Actor. Owns all queue state, so every mutation is
/// serialized here; the storage transaction inside each operation guards
/// against anything else touching the same rows.
pub struct Actor {
    services: Services,
    receiver: mpsc::Receiver<ActorMessage>,
    shutdown: CancellationToken,
    matchmaker: Matchmaker,
    strike_mode: bool,
    interval: Duration,
    next_game: DateTime<Utc>,
    drop_deadline: Instant,
    last_refresh: Option<Instant>,
    pending_refresh: Option<Instant>,
}

impl Actor {
    pub fn new(
        services: Services,
        receiver: mpsc::Receiver<ActorMessage>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let matchmaker = Matchmaker::new(services.clone());
        Self {
            services,
            receiver,
            shutdown,
            matchmaker,
            strike_mode: false,
            interval,
            next_game: Utc::now() + chrono::Duration::milliseconds(interval.as_millis() as i64),
            drop_deadline: Instant::now() + interval,
            last_refresh: None,
            pending_refresh: None,
        }
    }

    pub async fn run(&mut self) {
        info!("Hot drop queue starting; next round at {}", self.next_game);
        self.refresh_panel_now().await;

        loop {
            let pending = self.pending_refresh;
            tokio::select! {
                Some(msg) = self.receiver.recv() => {
                    self.handle_message(msg).await;
                }
                _ = tokio::time::sleep_until(self.drop_deadline) => {
                    self.run_round().await;
                }
                _ = tokio::time::sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                    self.pending_refresh = None;
                    self.refresh_panel_now().await;
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }
        info!("Hot drop queue shutting down");
    }

    async fn handle_message(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Join {
                user_id,
                as_host,
                rpc,
            } => {
                _ = rpc.send(self.join(&user_id, as_host).await);
            }
            ActorMessage::Leave { user_id, rpc } => {
                _ = rpc.send(self.leave(&user_id).await);
            }
            ActorMessage::Clear { rpc } => {
                _ = rpc.send(self.clear().await);
            }
            ActorMessage::SetDeploymentTime { interval, rpc } => {
                _ = rpc.send(self.set_deployment_time(interval).await);
            }
            ActorMessage::ToggleStrikeMode { rpc } => {
                self.strike_mode = !self.strike_mode;
                info!("Strike mode is now {}", self.strike_mode);
                self.submit_refresh().await;
                _ = rpc.send(self.strike_mode);
            }
            ActorMessage::SetPanel { channel, rpc } => {
                _ = rpc.send(self.set_panel(&channel).await);
            }
            ActorMessage::NextGame { rpc } => {
                _ = rpc.send(self.next_game);
            }
        }
    }

    /// The countdown fired: run matchmaking, then reset. Strike mode always
    /// switches off and the timer always re-arms, matched round or not.
    async fn run_round(&mut self) {
        match self.matchmaker.run(self.strike_mode).await {
            Ok(started) => {
                if started > 0 {
                    info!("Matchmaking round launched {started} hot drops");
                }
            }
            Err(err) => error!("Matchmaking round failed: {err:#}"),
        }

        self.strike_mode = false;
        self.rearm();
        self.submit_refresh().await;
    }

    fn rearm(&mut self) {
        self.drop_deadline = Instant::now() + self.interval;
        self.next_game =
            Utc::now() + chrono::Duration::milliseconds(self.interval.as_millis() as i64);
    }

    async fn join(&mut self, user_id: &str, as_host: bool) -> Result<(), OpError> {
        let mut tx = self.services.pool.begin().await?;

        let existing = QueueRow::find_user(&mut *tx, user_id).await?;
        if existing
            .as_ref()
            .is_some_and(|entry| entry.is_host == as_host)
        {
            return Err(OpError::conflict("You are already in the queue"));
        }

        let cap = if as_host {
            self.services.config.queue_max_hosts
        } else {
            self.services.config.queue_max_players
        };
        let occupied = QueueRow::count_role(&mut *tx, as_host).await?;
        if occupied >= cap as i64 && !self.strike_mode {
            return Err(OpError::conflict(if as_host {
                "The hosts queue is currently full!"
            } else {
                "The queue is currently full!"
            }));
        }

        let now_ms = Utc::now().timestamp_millis();
        match existing {
            // Opposite role: flip the row in place, keep it unique per user.
            Some(entry) => {
                sqlx::query("UPDATE queue SET is_host = ?, join_time = ? WHERE id = ?")
                    .bind(as_host)
                    .bind(now_ms)
                    .bind(entry.id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("INSERT INTO queue (user_id, is_host, join_time) VALUES (?, ?, ?)")
                    .bind(user_id)
                    .bind(as_host)
                    .bind(now_ms)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        info!(
            user = %user_id,
            kind = if as_host { "host" } else { "player" },
            strike_mode = self.strike_mode,
            "Queue join"
        );
        self.submit_refresh().await;
        Ok(())
    }

    async fn leave(&mut self, user_id: &str) -> Result<(), OpError> {
        let mut tx = self.services.pool.begin().await?;

        let entry = QueueRow::find_user(&mut *tx, user_id)
            .await?
            .ok_or_else(|| OpError::conflict("You are not in the queue"))?;
        let before = QueueRow::count(&mut *tx).await?;
        sqlx::query("DELETE FROM queue WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let after = QueueRow::count(&mut *tx).await?;
        tx.commit().await?;

        let waited = (Utc::now() - entry.joined_at()).num_seconds();
        info!(
            user = %user_id,
            waited = %format_duration(waited),
            queue_before = before,
            queue_after = after,
            "Queue leave"
        );
        self.submit_refresh().await;
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), OpError> {
        sqlx::query("DELETE FROM queue")
            .execute(&self.services.pool)
            .await?;
        info!("Queue cleared");
        self.submit_refresh().await;
        Ok(())
    }

    async fn set_deployment_time(
        &mut self,
        interval: Duration,
    ) -> Result<DateTime<Utc>, OpError> {
        crate::settings::set_deployment_interval(
            &self.services.pool,
            &self.services.config.guild_id,
            interval,
        )
        .await?;

        self.interval = interval;
        self.rearm();
        info!("Deployment interval set to {interval:?}; next round at {}", self.next_game);
        self.submit_refresh().await;
        Ok(self.next_game)
    }

    /// Publishes the queue panel into a channel and adopts it as the one
    /// panel to keep in sync; any previous panel message is deleted.
    async fn set_panel(&mut self, channel: &ChannelId) -> Result<(), OpError> {
        let view = self.panel_view().await.map_err(OpError::Internal)?;
        let message = self
            .services
            .transport
            .send(channel, &Render::QueuePanel(view))
            .await?;

        let previous = QueueStatusMessageRow::get(&self.services.pool).await?;
        QueueStatusMessageRow::set(&self.services.pool, &message.channel, &message.message)
            .await?;
        if let Some(previous) = previous {
            if let Err(err) = self
                .services
                .transport
                .delete(&previous.message_ref())
                .await
            {
                warn!("Failed to delete superseded queue panel: {err:#}");
            }
        }

        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Debounced refresh: runs immediately when the cool-down elapsed,
    /// otherwise defers a single refresh to the end of the cool-down,
    /// replacing any previously deferred one.
    async fn submit_refresh(&mut self) {
        let debounce =
            Duration::from_secs(self.services.config.panel_refresh_debounce_seconds);
        match self.last_refresh {
            Some(at) if at.elapsed() < debounce => {
                self.pending_refresh = Some(at + debounce);
            }
            _ => self.refresh_panel_now().await,
        }
    }

    async fn refresh_panel_now(&mut self) {
        self.last_refresh = Some(Instant::now());
        if let Err(err) = self.try_refresh_panel().await {
            warn!("Failed to refresh queue panel: {err:#}");
        }
    }

    async fn try_refresh_panel(&self) -> anyhow::Result<()> {
        let Some(panel) = QueueStatusMessageRow::get(&self.services.pool).await? else {
            return Ok(());
        };
        let view = self.panel_view().await?;
        self.services
            .transport
            .edit(&panel.message_ref(), &Render::QueuePanel(view))
            .await
    }

    async fn panel_view(&self) -> anyhow::Result<QueuePanel> {
        let entries = QueueRow::all(&self.services.pool).await?;

        let mut hosts = Vec::new();
        let mut players = Vec::new();
        for entry in entries {
            let display = self
                .services
                .membership
                .resolve_member(&entry.user_id)
                .await
                .unwrap_or_else(|| "Unknown User".to_string());
            if entry.is_host {
                hosts.push(display);
            } else {
                players.push(display);
            }
        }

        Ok(QueuePanel {
            next_game: self.next_game,
            strike_mode: self.strike_mode,
            hosts,
            players,
        })
    }
}
