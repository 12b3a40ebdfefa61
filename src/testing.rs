//! Shared test fixtures: an in-memory store and a recording fake for the
//! platform adapters.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::platform::{
    ChannelId, Membership, MessageRef, Notice, Render, RoomRef, Transport, UserId,
    VoiceProvisioner,
};
use crate::Services;

pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    pool
}

pub(crate) fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        guild_id: "guild-test".to_string(),
        deployment_channel: "chan-deploy".to_string(),
        departure_channel: "chan-departure".to_string(),
        voice_categories: vec!["cat-1".to_string(), "cat-2".to_string()],
        min_players_per_round: 3,
        max_roster_size: 4,
        departure_notice_lead_time_minutes: 15,
        deployment_delete_lead_time_minutes: 60,
        deployment_duration_minutes: 120,
        edit_lead_time_minutes: 10,
        queue_max_hosts: 2,
        queue_max_players: 6,
        panel_refresh_debounce_seconds: 1,
    }
}

pub(crate) fn services(pool: SqlitePool, config: Config, fake: &FakePlatform) -> Services {
    Services {
        pool,
        config: Arc::new(config),
        transport: Arc::new(fake.clone()),
        membership: Arc::new(fake.clone()),
        voice: Arc::new(fake.clone()),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CreatedRoom {
    pub category: ChannelId,
    pub name: String,
    pub capacity: u32,
    pub granted: Vec<UserId>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub sent: Vec<(ChannelId, Render, MessageRef)>,
    pub edits: Vec<(MessageRef, Render)>,
    pub deleted: Vec<MessageRef>,
    pub dms: Vec<(UserId, Notice)>,
    pub rooms_created: Vec<CreatedRoom>,
    pub rooms_deleted: Vec<RoomRef>,
    pub names: HashMap<UserId, String>,
    pub unknown_users: HashSet<UserId>,
    pub fail_sends: bool,
    pub fail_rooms: bool,
    next_message: u64,
    next_room: u64,
}

/// One fake standing in for all three adapters, recording every call.
#[derive(Clone, Default)]
pub(crate) struct FakePlatform {
    inner: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().expect("fake platform lock")
    }
}

#[async_trait]
impl Transport for FakePlatform {
    async fn send(&self, channel: &ChannelId, content: &Render) -> Result<MessageRef> {
        let mut state = self.state();
        if state.fail_sends {
            anyhow::bail!("transport send refused");
        }
        state.next_message += 1;
        let message = MessageRef {
            channel: channel.clone(),
            message: format!("msg-{}", state.next_message),
        };
        state.sent.push((channel.clone(), content.clone(), message.clone()));
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, content: &Render) -> Result<()> {
        self.state().edits.push((message.clone(), content.clone()));
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        self.state().deleted.push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl Membership for FakePlatform {
    async fn resolve_member(&self, user: &UserId) -> Option<String> {
        let state = self.state();
        if state.unknown_users.contains(user) {
            return None;
        }
        Some(
            state
                .names
                .get(user)
                .cloned()
                .unwrap_or_else(|| user.clone()),
        )
    }

    async fn send_dm(&self, user: &UserId, notice: &Notice) -> Result<()> {
        self.state().dms.push((user.clone(), notice.clone()));
        Ok(())
    }
}

#[async_trait]
impl VoiceProvisioner for FakePlatform {
    async fn create_voice_room(
        &self,
        category: &ChannelId,
        name: &str,
        capacity: u32,
        granted: &[UserId],
    ) -> Result<RoomRef> {
        let mut state = self.state();
        if state.fail_rooms {
            anyhow::bail!("voice category is full");
        }
        state.next_room += 1;
        let room = RoomRef(format!("room-{}", state.next_room));
        state.rooms_created.push(CreatedRoom {
            category: category.clone(),
            name: name.to_string(),
            capacity,
            granted: granted.to_vec(),
        });
        Ok(room)
    }

    async fn delete_voice_room(&self, room: &RoomRef) -> Result<()> {
        self.state().rooms_deleted.push(room.clone());
        Ok(())
    }
}
