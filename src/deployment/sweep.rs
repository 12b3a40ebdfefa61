//! Timed progression of deployments: departure notices, auto-start, cleanup
//! of expired posts, and the slower purge/orphan passes. Every pass isolates
//! per-row failures so one bad deployment can't block its siblings.

use chrono::{DateTime, Duration, Utc};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deployment::load_details;
use crate::deployment::schema::DeploymentRow;
use crate::platform::Render;
use crate::Services;

const CHECK_INTERVAL_SECS: u64 = 60;
const PURGE_INTERVAL_SECS: u64 = 60 * 60;
const ORPHAN_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub struct Sweep {
    services: Services,
    shutdown: CancellationToken,
}

impl Sweep {
    pub fn new(services: Services, shutdown: CancellationToken) -> Self {
        Self { services, shutdown }
    }

    /// Runs until cancelled. Each interval fires once immediately, so the
    /// passes also run on startup.
    pub async fn run(self) {
        info!("Deployment sweep starting");

        let mut check = tokio::time::interval(std::time::Duration::from_secs(CHECK_INTERVAL_SECS));
        let mut purge = tokio::time::interval(std::time::Duration::from_secs(PURGE_INTERVAL_SECS));
        let mut orphan =
            tokio::time::interval(std::time::Duration::from_secs(ORPHAN_INTERVAL_SECS));

        loop {
            select! {
                _ = check.tick() => {
                    self.check_deployments(Utc::now()).await;
                }
                _ = purge.tick() => {
                    if let Err(err) = self.purge_deleted().await {
                        error!("Purge pass failed: {err:#}");
                    }
                }
                _ = orphan.tick() => {
                    if let Err(err) = self.reap_orphans().await {
                        error!("Orphan pass failed: {err:#}");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }
        info!("Deployment sweep shutting down");
    }

    /// One minute-cadence tick: notices, starts, cleanup.
    pub(crate) async fn check_deployments(&self, now: DateTime<Utc>) {
        if let Err(err) = self.send_notices(now).await {
            error!("Notice pass failed: {err:#}");
        }
        if let Err(err) = self.start_deployments(now).await {
            error!("Start pass failed: {err:#}");
        }
        if let Err(err) = self.cleanup_expired(now).await {
            error!("Cleanup pass failed: {err:#}");
        }
    }

    /// Sends the departure notice for every deployment entering its lead
    /// window and freezes the roster by marking `notice_sent`.
    async fn send_notices(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let lead = Duration::minutes(self.services.config.departure_notice_lead_time_minutes);
        let due: Vec<DeploymentRow> = sqlx::query_as(
            "SELECT * FROM deployment
             WHERE deleted = 0 AND notice_sent = 0 AND start_time <= ?",
        )
        .bind((now + lead).timestamp_millis())
        .fetch_all(&self.services.pool)
        .await?;

        for row in due {
            let id = row.id;
            if let Err(err) = self.send_departure_notice(row).await {
                warn!("Failed to send departure notice for deployment {id}: {err:#}");
            }
        }
        Ok(())
    }

    async fn send_departure_notice(&self, row: DeploymentRow) -> anyhow::Result<()> {
        let mut conn = self.services.pool.acquire().await?;
        let details = load_details(&mut conn, row).await?;
        drop(conn);

        self.services
            .transport
            .send(
                &self.services.config.departure_channel,
                &Render::DepartureNotice(details.clone()),
            )
            .await?;

        sqlx::query("UPDATE deployment SET notice_sent = 1 WHERE id = ?")
            .bind(details.id)
            .execute(&self.services.pool)
            .await?;
        debug!("Departure notice sent for deployment {}", details.id);
        Ok(())
    }

    /// Marks due deployments as started and locks their signup post. The flag
    /// is set even when re-rendering fails: the deployment did start.
    async fn start_deployments(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let due: Vec<DeploymentRow> = sqlx::query_as(
            "SELECT * FROM deployment
             WHERE deleted = 0 AND started = 0 AND start_time <= ?",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.services.pool)
        .await?;

        for row in due {
            let id = row.id;
            if let Err(err) = self.lock_started_post(row).await {
                warn!("Failed to lock signup post for deployment {id}: {err:#}");
            }
            sqlx::query("UPDATE deployment SET started = 1 WHERE id = ?")
                .bind(id)
                .execute(&self.services.pool)
                .await?;
        }
        Ok(())
    }

    async fn lock_started_post(&self, row: DeploymentRow) -> anyhow::Result<()> {
        let mut conn = self.services.pool.acquire().await?;
        let details = load_details(&mut conn, row).await?;
        drop(conn);

        if let Some(message) = &details.message {
            self.services
                .transport
                .edit(message, &Render::LockedSignupPost(details.clone()))
                .await?;
        }

        info!(
            deployment = details.id,
            host = %details.host.user_id,
            title = %details.title,
            fireteam = details.fireteam.len(),
            backups = details.backups.len(),
            start = %details.start_time,
            "Deployment started"
        );
        Ok(())
    }

    /// Deletes the signup post of deployments whose end passed long enough
    /// ago and marks them logically deleted; the purge pass removes the rows
    /// later.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let lead = Duration::minutes(self.services.config.deployment_delete_lead_time_minutes);
        let due: Vec<DeploymentRow> = sqlx::query_as(
            "SELECT * FROM deployment WHERE deleted = 0 AND end_time <= ?",
        )
        .bind((now - lead).timestamp_millis())
        .fetch_all(&self.services.pool)
        .await?;

        for row in due {
            if let Some(message) = row.message_ref() {
                if let Err(err) = self.services.transport.delete(&message).await {
                    warn!(
                        "Failed to delete signup post for expired deployment {}: {err:#}",
                        row.id
                    );
                }
            }
            sqlx::query("UPDATE deployment SET deleted = 1 WHERE id = ?")
                .bind(row.id)
                .execute(&self.services.pool)
                .await?;
            debug!("Deployment {} expired and was marked deleted", row.id);
        }
        Ok(())
    }

    /// Physically removes logically deleted deployments together with their
    /// roster rows.
    pub(crate) async fn purge_deleted(&self) -> anyhow::Result<()> {
        let mut tx = self.services.pool.begin().await?;

        let rosters = sqlx::query(
            "DELETE FROM roster WHERE deployment_id IN
                 (SELECT id FROM deployment WHERE deleted = 1)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let deployments = sqlx::query("DELETE FROM deployment WHERE deleted = 1")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        if deployments > 0 {
            info!("Purged {deployments} deleted deployments and {rosters} roster rows");
        }
        Ok(())
    }

    /// Defensive cleanup: roster rows whose deployment no longer exists, and
    /// the latest-input scratch table.
    pub(crate) async fn reap_orphans(&self) -> anyhow::Result<()> {
        let mut tx = self.services.pool.begin().await?;

        let orphans = sqlx::query(
            "DELETE FROM roster WHERE deployment_id NOT IN (SELECT id FROM deployment)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let inputs = sqlx::query("DELETE FROM latest_input")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        debug!("Cleared {orphans} orphaned roster rows and {inputs} cached inputs");
        Ok(())
    }
}
