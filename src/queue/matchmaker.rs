//! One matchmaking round: partition the queue, form groups, provision a voice
//! room per group and clear the participants out. Failures are per-group; a
//! group that can't get its room stays queued for the next round.

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::platform::{HotDropAnnouncement, Notice, Render, RoomRef, UserId};
use crate::queue::schema::{QueueRow, VoiceRoomRow};
use crate::rules::{self, HotDropGroup};
use crate::Services;

const VOICE_ROOM_TTL_MS: i64 = 60 * 60 * 1000;

pub(crate) struct Matchmaker {
    services: Services,
    /// Round-robin index into the configured voice categories.
    rotation: usize,
}

impl Matchmaker {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            rotation: 0,
        }
    }

    /// Runs one round and returns the number of groups that launched.
    pub async fn run(&mut self, strike_mode: bool) -> anyhow::Result<usize> {
        let config = &self.services.config;

        let entries = QueueRow::all(&self.services.pool).await?;
        let (hosts, players): (Vec<QueueRow>, Vec<QueueRow>) =
            entries.into_iter().partition(|entry| entry.is_host);

        let groups = rules::assign_groups(
            hosts,
            players,
            config.max_roster_size.saturating_sub(1),
            config.min_players_per_round,
            strike_mode,
            &mut rand::thread_rng(),
        );

        let mut started = 0;
        for group in groups {
            let host_id = group.host.user_id.clone();
            match self.launch_group(group).await {
                Ok(()) => started += 1,
                Err(err) => {
                    warn!("Failed to launch hot drop for host {host_id}: {err:#}");
                }
            }
        }

        self.reap_expired_rooms().await;
        Ok(started)
    }

    async fn launch_group(&mut self, group: HotDropGroup<QueueRow>) -> anyhow::Result<()> {
        let config = self.services.config.clone();

        let host_display = self
            .services
            .membership
            .resolve_member(&group.host.user_id)
            .await
            .unwrap_or_else(|| "Unknown Host".to_string());
        let code = display_code(&mut rand::thread_rng());

        let category =
            &config.voice_categories[self.rotation % config.voice_categories.len()];
        self.rotation += 1;

        let mut granted: Vec<UserId> = vec![group.host.user_id.clone()];
        granted.extend(group.players.iter().map(|player| player.user_id.clone()));

        let room = self
            .services
            .voice
            .create_voice_room(
                category,
                &format!("🔊| HOTDROP {code} {host_display}"),
                config.max_roster_size as u32,
                &granted,
            )
            .await?;
        VoiceRoomRow::insert(
            &self.services.pool,
            &room.0,
            Utc::now().timestamp_millis() + VOICE_ROOM_TTL_MS,
        )
        .await?;

        for user in &granted {
            let notice = Notice::HotDropAssigned {
                code: code.clone(),
                room: room.clone(),
            };
            if let Err(err) = self.services.membership.send_dm(user, &notice).await {
                warn!("Failed to notify {user} about their hot drop: {err:#}");
            }
        }

        let announcement = Render::HotDropAnnouncement(HotDropAnnouncement {
            code: code.clone(),
            host: group.host.user_id.clone(),
            host_display: host_display.clone(),
            players: group
                .players
                .iter()
                .map(|player| player.user_id.clone())
                .collect(),
            room: room.clone(),
        });
        if let Err(err) = self
            .services
            .transport
            .send(&config.departure_channel, &announcement)
            .await
        {
            warn!("Failed to post hot drop announcement: {err:#}");
        }

        // Only now take the participants out of the queue, atomically.
        let mut tx = self.services.pool.begin().await?;
        for user in &granted {
            sqlx::query("DELETE FROM queue WHERE user_id = ?")
                .bind(user)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(
            host = %group.host.user_id,
            players = ?group.players.iter().map(|p| p.user_id.as_str()).collect::<Vec<_>>(),
            code = %code,
            room = %room.0,
            "Hot drop started"
        );
        Ok(())
    }

    /// Reclaims voice rooms whose hour is up. Best-effort: a room we can't
    /// delete stays recorded and is retried next round.
    async fn reap_expired_rooms(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let expired = match VoiceRoomRow::expired(&self.services.pool, now_ms).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Failed to list expired voice rooms: {err:#}");
                return;
            }
        };

        for row in expired {
            if let Err(err) = self
                .services
                .voice
                .delete_voice_room(&RoomRef(row.room.clone()))
                .await
            {
                warn!("Failed to delete voice room {}: {err:#}", row.room);
                continue;
            }
            if let Err(err) = VoiceRoomRow::delete(&self.services.pool, row.id).await {
                warn!("Failed to forget voice room {}: {err:#}", row.room);
            }
        }
    }
}

fn display_code(rng: &mut impl Rng) -> String {
    format!(
        "{}-{}",
        rng.gen_range(1000..10000),
        rng.gen_range(1000..10000)
    )
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::display_code;

    #[test]
    fn display_code_is_two_four_digit_parts() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let code = display_code(&mut rng);
            let (left, right) = code.split_once('-').expect("dash separator");
            assert_eq!(left.len(), 4);
            assert_eq!(right.len(), 4);
            assert!(left.chars().all(|c| c.is_ascii_digit()));
            assert!(right.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
