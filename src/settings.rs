//! Per-guild settings persisted alongside the rest of the store. Only the
//! deployment interval lives here today.

use std::time::Duration;

use sqlx::SqlitePool;

const DEFAULT_DEPLOYMENT_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn get_deployment_interval(
    pool: &SqlitePool,
    guild_id: &str,
) -> anyhow::Result<Duration> {
    let stored: Option<i64> =
        sqlx::query_scalar("SELECT deployment_interval_ms FROM setting WHERE guild_id = ?")
            .bind(guild_id)
            .fetch_optional(pool)
            .await?;

    Ok(stored
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64))
        .unwrap_or(DEFAULT_DEPLOYMENT_INTERVAL))
}

pub async fn set_deployment_interval(
    pool: &SqlitePool,
    guild_id: &str,
    interval: Duration,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO setting (guild_id, deployment_interval_ms) VALUES (?, ?)
         ON CONFLICT (guild_id) DO UPDATE SET deployment_interval_ms = excluded.deployment_interval_ms",
    )
    .bind(guild_id)
    .bind(interval.as_millis() as i64)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::testing;

    use super::*;

    #[tokio::test]
    async fn defaults_when_unset() {
        let pool = testing::memory_pool().await;
        let interval = get_deployment_interval(&pool, "guild-1").await.unwrap();
        assert_eq!(interval, DEFAULT_DEPLOYMENT_INTERVAL);
    }

    #[tokio::test]
    async fn round_trips_and_overwrites() {
        let pool = testing::memory_pool().await;

        set_deployment_interval(&pool, "guild-1", Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(
            get_deployment_interval(&pool, "guild-1").await.unwrap(),
            Duration::from_secs(900)
        );

        set_deployment_interval(&pool, "guild-1", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            get_deployment_interval(&pool, "guild-1").await.unwrap(),
            Duration::from_secs(300)
        );

        // Other guilds are unaffected.
        assert_eq!(
            get_deployment_interval(&pool, "guild-2").await.unwrap(),
            DEFAULT_DEPLOYMENT_INTERVAL
        );
    }
}
