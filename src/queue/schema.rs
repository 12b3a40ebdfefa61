use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use sqlx::FromRow;

use crate::platform::MessageRef;

#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: i64,
    pub user_id: String,
    pub is_host: bool,
    /// Milliseconds since the epoch; the FIFO key for matchmaking.
    pub join_time: i64,
}

impl QueueRow {
    pub fn joined_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.join_time).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// The whole queue in arrival order.
    pub async fn all<'e, E: Executor<'e, Database = Sqlite>>(ex: E) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM queue ORDER BY join_time, id")
            .fetch_all(ex)
            .await
    }

    pub async fn find_user<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        user_id: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM queue WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(ex)
            .await
    }

    pub async fn count_role<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        is_host: bool,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE is_host = ?")
            .bind(is_host)
            .fetch_one(ex)
            .await
    }

    pub async fn count<'e, E: Executor<'e, Database = Sqlite>>(ex: E) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queue")
            .fetch_one(ex)
            .await
    }
}

/// The singleton pointer to the rendered queue panel.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusMessageRow {
    pub id: i64,
    pub channel: String,
    pub message: String,
}

impl QueueStatusMessageRow {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel: self.channel.clone(),
            message: self.message.clone(),
        }
    }

    pub async fn get<'e, E: Executor<'e, Database = Sqlite>>(ex: E) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM queue_status_message WHERE id = 1")
            .fetch_optional(ex)
            .await
    }

    pub async fn set<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        channel: &str,
        message: &str,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO queue_status_message (id, channel, message) VALUES (1, ?, ?)
             ON CONFLICT (id) DO UPDATE SET channel = excluded.channel, message = excluded.message",
        )
        .bind(channel)
        .bind(message)
        .execute(ex)
        .await?;
        Ok(())
    }
}

/// Ephemeral voice rooms we allocated, kept so they can be reclaimed after
/// their hour is up.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRoomRow {
    pub id: i64,
    pub room: String,
    pub expires_at: i64,
}

impl VoiceRoomRow {
    pub async fn insert<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        room: &str,
        expires_at: i64,
    ) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO voice_room (room, expires_at) VALUES (?, ?)")
            .bind(room)
            .bind(expires_at)
            .execute(ex)
            .await?;
        Ok(())
    }

    pub async fn expired<'e, E: Executor<'e, Database = Sqlite>>(
        ex: E,
        now_ms: i64,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM voice_room WHERE expires_at <= ?")
            .bind(now_ms)
            .fetch_all(ex)
            .await
    }

    pub async fn delete<'e, E: Executor<'e, Database = Sqlite>>(ex: E, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM voice_room WHERE id = ?")
            .bind(id)
            .execute(ex)
            .await?;
        Ok(())
    }
}
