//! Boundary to the chat platform. The core never talks to a concrete SDK;
//! it hands these traits semantic payloads and the adapter decides how they
//! look on screen.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::schema::DeploymentDetails;

pub type UserId = String;
pub type ChannelId = String;

/// Location of a message the core previously asked the platform to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: String,
}

/// Handle to an ephemeral voice room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRef(pub String);

/// Semantic content of an outgoing message. Visual presentation is the
/// adapter's problem.
#[derive(Debug, Clone, PartialEq)]
pub enum Render {
    /// The signup post while the deployment is open.
    SignupPost(DeploymentDetails),
    /// The signup post once the deployment started: read-only, no controls.
    LockedSignupPost(DeploymentDetails),
    DepartureNotice(DeploymentDetails),
    QueuePanel(QueuePanel),
    HotDropAnnouncement(HotDropAnnouncement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePanel {
    pub next_game: DateTime<Utc>,
    pub strike_mode: bool,
    pub hosts: Vec<String>,
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotDropAnnouncement {
    pub code: String,
    pub host: UserId,
    pub host_display: String,
    pub players: Vec<UserId>,
    pub room: RoomRef,
}

/// Direct notification to a single user. Delivery is best-effort everywhere:
/// a recipient that disabled notices is not an error worth surfacing.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    StartTimeChanged {
        title: String,
        old_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
    },
    DeploymentDeleted {
        title: String,
        start_time: DateTime<Utc>,
    },
    HotDropAssigned {
        code: String,
        room: RoomRef,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, channel: &ChannelId, content: &Render) -> Result<MessageRef>;
    async fn edit(&self, message: &MessageRef, content: &Render) -> Result<()>;
    async fn delete(&self, message: &MessageRef) -> Result<()>;
}

#[async_trait]
pub trait Membership: Send + Sync {
    /// Display name for a user, or `None` when the platform no longer knows
    /// them.
    async fn resolve_member(&self, user: &UserId) -> Option<String>;
    async fn send_dm(&self, user: &UserId, notice: &Notice) -> Result<()>;
}

#[async_trait]
pub trait VoiceProvisioner: Send + Sync {
    async fn create_voice_room(
        &self,
        category: &ChannelId,
        name: &str,
        capacity: u32,
        granted: &[UserId],
    ) -> Result<RoomRef>;

    async fn delete_voice_room(&self, room: &RoomRef) -> Result<()>;
}
