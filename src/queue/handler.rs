use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::actor::{Actor, ActorMessage};
use crate::error::OpError;
use crate::platform::ChannelId;
use crate::Services;

/// Cloneable handle to the queue actor.
#[derive(Clone)]
pub struct Handler {
    sender: mpsc::Sender<ActorMessage>,
}

impl Handler {
    pub fn new(services: Services, interval: Duration, shutdown: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(16);
        let mut actor = Actor::new(services, receiver, interval, shutdown);
        tokio::spawn(async move { actor.run().await });

        Self { sender }
    }

    pub async fn join(&self, user_id: &str) -> Result<(), OpError> {
        self.call(|rpc| ActorMessage::Join {
            user_id: user_id.to_string(),
            as_host: false,
            rpc,
        })
        .await
    }

    pub async fn join_as_host(&self, user_id: &str) -> Result<(), OpError> {
        self.call(|rpc| ActorMessage::Join {
            user_id: user_id.to_string(),
            as_host: true,
            rpc,
        })
        .await
    }

    pub async fn leave(&self, user_id: &str) -> Result<(), OpError> {
        self.call(|rpc| ActorMessage::Leave {
            user_id: user_id.to_string(),
            rpc,
        })
        .await
    }

    /// Empties the queue unconditionally.
    pub async fn clear(&self) -> Result<(), OpError> {
        self.call(|rpc| ActorMessage::Clear { rpc }).await
    }

    /// Persists a new round interval and re-arms the countdown; returns the
    /// new next-round instant.
    pub async fn set_deployment_time(
        &self,
        interval: Duration,
    ) -> Result<DateTime<Utc>, OpError> {
        self.call(|rpc| ActorMessage::SetDeploymentTime { interval, rpc })
            .await
    }

    /// Flips strike mode and returns the new state for the caller to
    /// announce.
    pub async fn toggle_strike_mode(&self) -> bool {
        self.call(|rpc| ActorMessage::ToggleStrikeMode { rpc }).await
    }

    pub async fn set_panel(&self, channel: ChannelId) -> Result<(), OpError> {
        self.call(|rpc| ActorMessage::SetPanel { channel, rpc })
            .await
    }

    pub async fn next_game(&self) -> DateTime<Utc> {
        self.call(|rpc| ActorMessage::NextGame { rpc }).await
    }

    async fn call<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> ActorMessage) -> R {
        let (rpc, receiver) = oneshot::channel();
        // unwrap because if the actor is gone we are in a bad state anyway
        self.sender.send(build(rpc)).await.unwrap();
        receiver.await.unwrap()
    }
}
