//! Core engine for the community deployment board: scheduled, capacity-limited
//! group signups ("deployments") and the rolling hot drop matchmaking queue.
//! The chat platform itself is reached only through the adapter traits in
//! [`platform`].

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::platform::{Membership, Transport, VoiceProvisioner};

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod deployment;
pub mod error;
pub mod platform;
pub mod queue;
pub mod rules;
pub mod settings;
pub mod shutdown;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

/// Shared handles every component needs: the store, the configuration and the
/// platform adapters.
#[derive(Clone)]
pub struct Services {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub transport: Arc<dyn Transport>,
    pub membership: Arc<dyn Membership>,
    pub voice: Arc<dyn VoiceProvisioner>,
}
