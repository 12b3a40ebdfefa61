use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use sqlx::FromRow;

use crate::platform::{ChannelId, MessageRef, UserId};
use crate::rules::{parse_role, DeploymentRole};

/// Which roster a row sits on. Stored as text; the unique index on
/// `(deployment_id, user_id)` is what keeps a user off both rosters at once.
#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum RosterKind {
    Fireteam,
    Backup,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRow {
    pub id: i64,
    pub title: String,
    pub difficulty: String,
    pub description: String,
    pub channel: String,
    pub message: Option<String>,
    pub host_id: String,
    /// Milliseconds since the epoch, like every instant in the store.
    pub start_time: i64,
    pub end_time: i64,
    pub started: bool,
    pub notice_sent: bool,
    pub deleted: bool,
}

impl DeploymentRow {
    pub fn starts_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.start_time).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.end_time).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn message_ref(&self) -> Option<MessageRef> {
        self.message.as_ref().map(|message| MessageRef {
            channel: self.channel.clone(),
            message: message.clone(),
        })
    }

    pub async fn find<'e, E: Executor<'e, Database = Sqlite>>(ex: E, id: i64) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM deployment WHERE id = ?")
            .bind(id)
            .fetch_optional(ex)
            .await
    }

    /// Interactive flows only know the signup post they came from.
    pub async fn find_by_message<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        message_id: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM deployment WHERE message = ?")
            .bind(message_id)
            .fetch_optional(ex)
            .await
    }

    /// Administrative flows address deployments by title, among the ones that
    /// are still live and unstarted.
    pub async fn find_live_by_title<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        title: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT * FROM deployment WHERE title = ? AND deleted = 0 AND started = 0",
        )
        .bind(title)
        .fetch_optional(ex)
        .await
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct RosterRow {
    pub id: i64,
    pub deployment_id: i64,
    pub user_id: String,
    pub kind: RosterKind,
    pub role: String,
}

impl RosterRow {
    pub async fn for_deployment<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        deployment_id: i64,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM roster WHERE deployment_id = ? ORDER BY id")
            .bind(deployment_id)
            .fetch_all(ex)
            .await
    }

    pub async fn find_member<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        deployment_id: i64,
        user_id: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM roster WHERE deployment_id = ? AND user_id = ?")
            .bind(deployment_id)
            .bind(user_id)
            .fetch_optional(ex)
            .await
    }

    pub async fn count_kind<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        deployment_id: i64,
        kind: RosterKind,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM roster WHERE deployment_id = ? AND kind = ?")
            .bind(deployment_id)
            .bind(kind)
            .fetch_one(ex)
            .await
    }

    pub async fn insert<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        deployment_id: i64,
        user_id: &str,
        kind: RosterKind,
        role: DeploymentRole,
    ) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO roster (deployment_id, user_id, kind, role) VALUES (?, ?, ?, ?)")
            .bind(deployment_id)
            .bind(user_id)
            .bind(kind)
            .bind(role.to_string())
            .execute(ex)
            .await?;
        Ok(())
    }

    pub async fn delete<'e, E: Executor<'e, Database = Sqlite>>(ex: E, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM roster WHERE id = ?")
            .bind(id)
            .execute(ex)
            .await?;
        Ok(())
    }

    pub fn parsed_role(&self) -> DeploymentRole {
        match self.kind {
            RosterKind::Backup => DeploymentRole::Backup,
            RosterKind::Fireteam => parse_role(&self.role),
        }
    }
}

/// Scratch copy of the last rejected deployment form, keyed by user, so the
/// form can be shown again pre-filled. Raw text on purpose: it failed
/// validation once already.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestInputRow {
    pub user_id: String,
    pub title: String,
    pub difficulty: String,
    pub description: String,
    pub start_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterMember {
    pub user_id: UserId,
    pub role: DeploymentRole,
}

/// Snapshot of one deployment with its rosters resolved, as handed to the
/// adapters and returned from every operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentDetails {
    pub id: i64,
    pub title: String,
    pub difficulty: String,
    pub description: String,
    pub channel: ChannelId,
    pub message: Option<MessageRef>,
    pub host: RosterMember,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub fireteam: Vec<RosterMember>,
    pub backups: Vec<RosterMember>,
}

impl DeploymentDetails {
    /// Everyone on either roster, host included.
    pub fn participants(&self) -> impl Iterator<Item = &RosterMember> {
        self.fireteam.iter().chain(self.backups.iter())
    }
}
