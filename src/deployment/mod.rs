//! Deployment lifecycle manager: creation, editing, signup, removal, leaving
//! and deletion of scheduled group events. The timed transitions live in
//! [`sweep`].

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::error::OpError;
use crate::platform::{Notice, Render, UserId};
use crate::rules::DeploymentRole;
use crate::Services;

pub mod schema;
pub mod sweep;


use schema::{
    DeploymentDetails, DeploymentRow, LatestInputRow, RosterKind, RosterMember, RosterRow,
};

/// The user performing an administrative operation, as resolved by the
/// gateway.
#[derive(Debug, Clone)]
pub struct ActingMember {
    pub user_id: UserId,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub title: String,
    pub difficulty: String,
    pub description: String,
    pub host_id: UserId,
    pub start_time: DateTime<Utc>,
}

/// Partial edit: only the provided fields change.
#[derive(Debug, Clone, Default)]
pub struct DeploymentChanges {
    pub title: Option<String>,
    pub difficulty: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

pub struct DeploymentManager {
    services: Services,
}

impl DeploymentManager {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Creates the deployment with its host already on the fireteam and the
    /// signup post published. The post is sent before commit so its id can be
    /// stored on the row; if anything after the send fails, the post is
    /// deleted again as compensation.
    pub async fn create(&self, new: NewDeployment) -> Result<DeploymentDetails, OpError> {
        let now = Utc::now();
        if new.start_time <= now {
            return Err(OpError::validation("Start time must be in the future"));
        }
        let end_time =
            new.start_time + Duration::minutes(self.services.config.deployment_duration_minutes);

        let mut tx = self.services.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO deployment
                 (title, difficulty, description, channel, message, host_id, start_time, end_time)
             VALUES (?, ?, ?, ?, NULL, ?, ?, ?)
             RETURNING id",
        )
        .bind(&new.title)
        .bind(&new.difficulty)
        .bind(&new.description)
        .bind(&self.services.config.deployment_channel)
        .bind(&new.host_id)
        .bind(new.start_time.timestamp_millis())
        .bind(end_time.timestamp_millis())
        .fetch_one(&mut *tx)
        .await?;

        RosterRow::insert(
            &mut *tx,
            id,
            &new.host_id,
            RosterKind::Fireteam,
            DeploymentRole::Fireteam,
        )
        .await?;

        let row = DeploymentRow::find(&mut *tx, id)
            .await?
            .ok_or_else(|| OpError::not_found("Deployment vanished during creation"))?;
        let mut details = load_details(&mut tx, row).await?;

        // Risky step: from here on a failure must delete the post again,
        // since the platform can't take part in the transaction.
        let message = self
            .services
            .transport
            .send(&details.channel, &Render::SignupPost(details.clone()))
            .await?;
        details.message = Some(message.clone());

        let finish = async {
            sqlx::query("UPDATE deployment SET message = ? WHERE id = ?")
                .bind(&message.message)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        };
        if let Err(err) = finish.await {
            warn!("Deleting signup post for partially created deployment {id}");
            if let Err(cleanup) = self.services.transport.delete(&message).await {
                warn!("Failed to delete orphaned signup post: {cleanup:#}");
            }
            return Err(err.into());
        }

        info!(
            "Deployment created: {id} \"{}\" by {} starting {}",
            details.title, details.host.user_id, details.start_time
        );
        Ok(details)
    }

    /// Applies a partial edit and returns the before/after snapshots. The
    /// start time may only be moved into the past by the configured grace
    /// window; moving it later notifies everyone signed up.
    pub async fn update(
        &self,
        requester: &ActingMember,
        id: i64,
        changes: DeploymentChanges,
    ) -> Result<(DeploymentDetails, DeploymentDetails), OpError> {
        let now = Utc::now();
        if let Some(new_start) = changes.start_time {
            let grace = Duration::minutes(self.services.config.edit_lead_time_minutes);
            if new_start < now - grace {
                return Err(OpError::validation(
                    "The new start time is already in the past",
                ));
            }
        }

        let mut tx = self.services.pool.begin().await?;

        let row = DeploymentRow::find(&mut *tx, id)
            .await?
            .filter(|row| !row.deleted)
            .ok_or_else(|| OpError::not_found("Deployment not found"))?;
        if !requester.is_admin && row.host_id != requester.user_id {
            return Err(OpError::unauthorized(
                "Only the host or an admin can edit a deployment",
            ));
        }
        if row.started {
            return Err(OpError::conflict(
                "Can't edit a deployment after it started",
            ));
        }
        if row.notice_sent {
            return Err(OpError::conflict(
                "Can't edit a deployment after the departure notice was sent",
            ));
        }

        let old = load_details(&mut tx, row.clone()).await?;

        let title = changes.title.unwrap_or(row.title);
        let difficulty = changes.difficulty.unwrap_or(row.difficulty);
        let description = changes.description.unwrap_or(row.description);
        let (start_time, end_time) = match changes.start_time {
            Some(new_start) => (
                new_start,
                new_start + Duration::minutes(self.services.config.deployment_duration_minutes),
            ),
            None => (old.start_time, old.end_time),
        };

        sqlx::query(
            "UPDATE deployment
             SET title = ?, difficulty = ?, description = ?, start_time = ?, end_time = ?
             WHERE id = ?",
        )
        .bind(&title)
        .bind(&difficulty)
        .bind(&description)
        .bind(start_time.timestamp_millis())
        .bind(end_time.timestamp_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let row = DeploymentRow::find(&mut *tx, id)
            .await?
            .ok_or_else(|| OpError::not_found("Deployment vanished during edit"))?;
        let new = load_details(&mut tx, row).await?;
        tx.commit().await?;

        self.rerender_post(&new).await;
        if new.start_time > old.start_time {
            self.notify_participants(
                &old,
                &Notice::StartTimeChanged {
                    title: new.title.clone(),
                    old_start: old.start_time,
                    new_start: new.start_time,
                },
            )
            .await;
        }

        info!(
            "Deployment edited: {id} by {}; start {} -> {}",
            requester.user_id, old.start_time, new.start_time
        );
        Ok((old, new))
    }

    /// Adds the user to the selected roster of the deployment behind the
    /// given signup post. Re-selecting the current role is a conflict;
    /// selecting a different one switches rosters atomically.
    pub async fn signup(
        &self,
        user_id: &str,
        message_id: &str,
        role: DeploymentRole,
    ) -> Result<DeploymentDetails, OpError> {
        if role == DeploymentRole::Unspecified {
            return Err(OpError::validation("Unknown role"));
        }

        let mut tx = self.services.pool.begin().await?;

        let row = DeploymentRow::find_by_message(&mut *tx, message_id)
            .await?
            .filter(|row| !row.deleted)
            .ok_or_else(|| OpError::not_found("Deployment not found"))?;
        if row.started {
            return Err(OpError::conflict(
                "Can't sign up to a deployment after it started",
            ));
        }
        if row.notice_sent {
            return Err(OpError::conflict(
                "Can't sign up after the departure notice was sent",
            ));
        }

        let kind = match role {
            DeploymentRole::Backup => RosterKind::Backup,
            _ => RosterKind::Fireteam,
        };
        if kind == RosterKind::Backup && row.host_id == user_id {
            return Err(OpError::conflict(
                "You can't sign up as Backup on your own deployment",
            ));
        }

        if let Some(existing) = RosterRow::find_member(&mut *tx, row.id, user_id).await? {
            if existing.parsed_role() == role {
                return Err(OpError::conflict(format!(
                    "You are already signed up as {role}"
                )));
            }
            // Switching rosters is a remove-then-insert, never a duplicate.
            RosterRow::delete(&mut *tx, existing.id).await?;
        }

        let occupied = RosterRow::count_kind(&mut *tx, row.id, kind).await?;
        if crate::rules::roster_full(occupied, self.services.config.max_roster_size) {
            let which = match kind {
                RosterKind::Fireteam => "Fireteam",
                RosterKind::Backup => "Backup",
            };
            return Err(OpError::conflict(format!(
                "The {which} roster for this deployment is full"
            )));
        }

        RosterRow::insert(&mut *tx, row.id, user_id, kind, role).await?;

        let details = load_details(&mut tx, row).await?;
        tx.commit().await?;

        self.rerender_post(&details).await;
        info!(
            "User {user_id} signed up to deployment {} as {role}",
            details.id
        );
        Ok(details)
    }

    /// Self-service exit from whichever roster the user occupies. Hosts can't
    /// abandon their own deployment, and the roster freezes once the
    /// departure notice went out.
    pub async fn leave(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<DeploymentDetails, OpError> {
        let mut tx = self.services.pool.begin().await?;

        let row = DeploymentRow::find_by_message(&mut *tx, message_id)
            .await?
            .filter(|row| !row.deleted)
            .ok_or_else(|| OpError::not_found("Deployment not found"))?;
        if row.started {
            return Err(OpError::conflict(
                "Can't leave a deployment after it already started",
            ));
        }
        if row.notice_sent {
            return Err(OpError::conflict(
                "Can't leave after the departure notice was sent",
            ));
        }
        if row.host_id == user_id {
            return Err(OpError::conflict("You can't leave your own deployment"));
        }

        let member = RosterRow::find_member(&mut *tx, row.id, user_id)
            .await?
            .ok_or_else(|| OpError::conflict("You are not signed up for this deployment"))?;
        RosterRow::delete(&mut *tx, member.id).await?;

        let details = load_details(&mut tx, row).await?;
        tx.commit().await?;

        self.rerender_post(&details).await;
        info!("User {user_id} left deployment {}", details.id);
        Ok(details)
    }

    /// Administrative removal of another participant, addressed by deployment
    /// title since this path has no signup post at hand. Self-removal is
    /// always rejected, host or not.
    pub async fn remove(
        &self,
        acting: &ActingMember,
        target_user: &str,
        deployment_title: &str,
    ) -> Result<DeploymentDetails, OpError> {
        let mut tx = self.services.pool.begin().await?;

        let row = DeploymentRow::find_live_by_title(&mut *tx, deployment_title)
            .await?
            .ok_or_else(|| {
                OpError::not_found(format!(
                    "Can't find a live deployment titled: {deployment_title}"
                ))
            })?;
        if !acting.is_admin && row.host_id != acting.user_id {
            return Err(OpError::unauthorized(
                "Only the host or an admin can remove players",
            ));
        }
        if acting.user_id == target_user {
            return Err(OpError::unauthorized(
                "You can't remove yourself from a deployment",
            ));
        }

        let member = RosterRow::find_member(&mut *tx, row.id, target_user)
            .await?
            .ok_or_else(|| OpError::conflict("User is not signed up for this deployment"))?;
        RosterRow::delete(&mut *tx, member.id).await?;

        let details = load_details(&mut tx, row).await?;
        tx.commit().await?;

        self.rerender_post(&details).await;
        info!(
            "User {target_user} removed from deployment {} by {}",
            details.id, acting.user_id
        );
        Ok(details)
    }

    /// Host- or admin-triggered deletion. The row goes away immediately (its
    /// roster rows are reaped by the orphan pass) and everyone signed up gets
    /// a direct notice. Returns the pre-delete snapshot.
    pub async fn delete(
        &self,
        acting: &ActingMember,
        message_id: &str,
    ) -> Result<DeploymentDetails, OpError> {
        let mut tx = self.services.pool.begin().await?;

        let row = DeploymentRow::find_by_message(&mut *tx, message_id)
            .await?
            .ok_or_else(|| OpError::not_found("Deployment not found"))?;
        if !acting.is_admin && row.host_id != acting.user_id {
            return Err(OpError::unauthorized(
                "You do not have permission to delete this deployment",
            ));
        }

        let details = load_details(&mut tx, row).await?;
        sqlx::query("DELETE FROM deployment WHERE id = ?")
            .bind(details.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.notify_participants(
            &details,
            &Notice::DeploymentDeleted {
                title: details.title.clone(),
                start_time: details.start_time,
            },
        )
        .await;
        if let Some(message) = &details.message {
            if let Err(err) = self.services.transport.delete(message).await {
                warn!("Failed to delete signup post for deployment {}: {err:#}", details.id);
            }
        }

        info!(
            "Deployment deleted: {} \"{}\" by {}",
            details.id, details.title, acting.user_id
        );
        Ok(details)
    }

    /// Remembers a user's last rejected deployment form so it can be shown
    /// again pre-filled.
    pub async fn store_latest_input(&self, input: &LatestInputRow) -> Result<(), OpError> {
        sqlx::query(
            "INSERT INTO latest_input (user_id, title, difficulty, description, start_time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                 title = excluded.title,
                 difficulty = excluded.difficulty,
                 description = excluded.description,
                 start_time = excluded.start_time",
        )
        .bind(&input.user_id)
        .bind(&input.title)
        .bind(&input.difficulty)
        .bind(&input.description)
        .bind(&input.start_time)
        .execute(&self.services.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_input(&self, user_id: &str) -> Result<Option<LatestInputRow>, OpError> {
        Ok(
            sqlx::query_as("SELECT * FROM latest_input WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.services.pool)
                .await?,
        )
    }

    pub async fn clear_latest_input(&self, user_id: &str) -> Result<(), OpError> {
        sqlx::query("DELETE FROM latest_input WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.services.pool)
            .await?;
        Ok(())
    }

    async fn rerender_post(&self, details: &DeploymentDetails) {
        let Some(message) = &details.message else {
            return;
        };
        if let Err(err) = self
            .services
            .transport
            .edit(message, &Render::SignupPost(details.clone()))
            .await
        {
            warn!(
                "Failed to re-render signup post for deployment {}: {err:#}",
                details.id
            );
        }
    }

    async fn notify_participants(&self, details: &DeploymentDetails, notice: &Notice) {
        for member in details.participants() {
            if let Err(err) = self
                .services
                .membership
                .send_dm(&member.user_id, notice)
                .await
            {
                warn!("Failed to notify {}: {err:#}", member.user_id);
            }
        }
    }
}

/// Resolves a deployment row into the full snapshot, rosters included.
pub(crate) async fn load_details(
    conn: &mut SqliteConnection,
    row: DeploymentRow,
) -> sqlx::Result<DeploymentDetails> {
    let roster = RosterRow::for_deployment(&mut *conn, row.id).await?;
    let message = row.message_ref();
    let start_time = row.starts_at();
    let end_time = row.ends_at();

    let mut fireteam = Vec::new();
    let mut backups = Vec::new();
    let mut host = RosterMember {
        user_id: row.host_id.clone(),
        role: DeploymentRole::Fireteam,
    };
    for entry in roster {
        let member = RosterMember {
            user_id: entry.user_id.clone(),
            role: entry.parsed_role(),
        };
        if entry.user_id == row.host_id {
            host = member.clone();
        }
        match entry.kind {
            RosterKind::Fireteam => fireteam.push(member),
            RosterKind::Backup => backups.push(member),
        }
    }

    Ok(DeploymentDetails {
        id: row.id,
        title: row.title,
        difficulty: row.difficulty,
        description: row.description,
        channel: row.channel,
        message,
        host,
        start_time,
        end_time,
        fireteam,
        backups,
    })
}
