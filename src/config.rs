use std::env;
use std::str::FromStr;

use anyhow::Context;

/// Runtime configuration, loaded once at startup from the environment
/// (a `.env` file is honoured in development).
#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub guild_id: String,
    /// Channel the signup posts go to.
    pub deployment_channel: String,
    /// Channel for departure notices and hot drop announcements.
    pub departure_channel: String,
    /// Categories the ephemeral voice rooms rotate through.
    pub voice_categories: Vec<String>,
    pub min_players_per_round: usize,
    pub max_roster_size: usize,
    pub departure_notice_lead_time_minutes: i64,
    pub deployment_delete_lead_time_minutes: i64,
    pub deployment_duration_minutes: i64,
    pub edit_lead_time_minutes: i64,
    pub queue_max_hosts: usize,
    pub queue_max_players: usize,
    pub panel_refresh_debounce_seconds: u64,
}

impl Config {
    pub fn new() -> anyhow::Result<Config> {
        _ = dotenvy::dotenv();

        let voice_categories: Vec<String> = env::var("VOICE_CATEGORIES")
            .context("VOICE_CATEGORIES is required.")?
            .split(',')
            .map(|category| category.trim().to_string())
            .filter(|category| !category.is_empty())
            .collect();
        if voice_categories.is_empty() {
            anyhow::bail!("VOICE_CATEGORIES must name at least one category");
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required.")?,
            guild_id: env::var("GUILD_ID").context("GUILD_ID is required.")?,
            deployment_channel: env::var("DEPLOYMENT_CHANNEL")
                .context("DEPLOYMENT_CHANNEL is required.")?,
            departure_channel: env::var("DEPARTURE_CHANNEL")
                .context("DEPARTURE_CHANNEL is required.")?,
            voice_categories,
            min_players_per_round: env_or("MIN_PLAYERS_PER_ROUND", 3)?,
            max_roster_size: env_or("MAX_ROSTER_SIZE", 4)?,
            departure_notice_lead_time_minutes: env_or("DEPARTURE_NOTICE_LEAD_TIME_MINUTES", 15)?,
            deployment_delete_lead_time_minutes: env_or("DEPLOYMENT_DELETE_LEAD_TIME_MINUTES", 60)?,
            deployment_duration_minutes: env_or("DEPLOYMENT_DURATION_MINUTES", 120)?,
            edit_lead_time_minutes: env_or("EDIT_LEAD_TIME_MINUTES", 10)?,
            queue_max_hosts: env_or("QUEUE_MAX_HOSTS", 2)?,
            queue_max_players: env_or("QUEUE_MAX_PLAYERS", 6)?,
            panel_refresh_debounce_seconds: env_or("PANEL_REFRESH_DEBOUNCE_SECONDS", 3)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{key} is not a valid value")),
        Err(_) => Ok(default),
    }
}
