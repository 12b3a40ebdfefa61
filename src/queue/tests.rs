use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use super::matchmaker::Matchmaker;
use super::schema::{QueueRow, QueueStatusMessageRow, VoiceRoomRow};
use super::HotDropQueue;
use crate::error::OpError;
use crate::platform::{Notice, Render};
use crate::settings;
use crate::testing::{self, FakePlatform};

async fn setup_engine(interval: Duration) -> (HotDropQueue, FakePlatform, SqlitePool) {
    let pool = testing::memory_pool().await;
    let fake = FakePlatform::default();
    let services = testing::services(pool.clone(), testing::test_config(), &fake);
    let queue = HotDropQueue::new(services, interval, CancellationToken::new());
    (queue, fake, pool)
}

async fn setup_matchmaker() -> (Matchmaker, FakePlatform, SqlitePool) {
    let pool = testing::memory_pool().await;
    let fake = FakePlatform::default();
    let services = testing::services(pool.clone(), testing::test_config(), &fake);
    (Matchmaker::new(services), fake, pool)
}

async fn enqueue(pool: &SqlitePool, user: &str, is_host: bool, join_time: i64) {
    sqlx::query("INSERT INTO queue (user_id, is_host, join_time) VALUES (?, ?, ?)")
        .bind(user)
        .bind(is_host)
        .bind(join_time)
        .execute(pool)
        .await
        .expect("enqueue");
}

async fn queue_count(pool: &SqlitePool) -> i64 {
    QueueRow::count(pool).await.expect("queue count")
}

#[tokio::test]
async fn opposite_role_join_updates_in_place() {
    let (queue, _fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    queue.join("user-1").await.expect("join as player");
    let row = QueueRow::find_user(&pool, "user-1")
        .await
        .expect("query")
        .expect("row");
    assert!(!row.is_host);

    queue.join_as_host("user-1").await.expect("flip to host");
    let flipped = QueueRow::find_user(&pool, "user-1")
        .await
        .expect("query")
        .expect("row");
    assert!(flipped.is_host);
    assert_eq!(flipped.id, row.id, "updated in place, not reinserted");
    assert_eq!(queue_count(&pool).await, 1);

    // Requesting the role already held is a conflict.
    assert!(matches!(
        queue.join_as_host("user-1").await,
        Err(OpError::Conflict(_))
    ));
}

#[tokio::test]
async fn role_caps_apply_until_strike_mode() {
    let (queue, _fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    // queue_max_hosts is 2 in the test config.
    queue.join_as_host("host-1").await.expect("host 1");
    queue.join_as_host("host-2").await.expect("host 2");
    assert!(matches!(
        queue.join_as_host("host-3").await,
        Err(OpError::Conflict(_))
    ));

    // queue_max_players is 6.
    for n in 1..=6 {
        queue.join(&format!("player-{n}")).await.expect("player");
    }
    assert!(matches!(
        queue.join("player-7").await,
        Err(OpError::Conflict(_))
    ));

    // Strike mode lifts both caps for the mass sign-up.
    assert!(queue.toggle_strike_mode().await);
    queue.join_as_host("host-3").await.expect("host over cap");
    queue.join("player-7").await.expect("player over cap");
    assert_eq!(queue_count(&pool).await, 10);
}

#[tokio::test]
async fn leave_requires_queued_user() {
    let (queue, _fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    assert!(matches!(
        queue.leave("user-1").await,
        Err(OpError::Conflict(_))
    ));

    queue.join("user-1").await.expect("join");
    queue.leave("user-1").await.expect("leave");
    assert_eq!(queue_count(&pool).await, 0);
}

#[tokio::test]
async fn clear_empties_the_queue() {
    let (queue, _fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    queue.join_as_host("host-1").await.expect("host");
    queue.join("player-1").await.expect("player");
    queue.clear().await.expect("clear");
    assert_eq!(queue_count(&pool).await, 0);
}

#[tokio::test]
async fn set_deployment_time_persists_and_rearms() {
    let (queue, _fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    let before = Utc::now();
    let next = queue
        .set_deployment_time(Duration::from_secs(900))
        .await
        .expect("set interval");

    assert!(next > before + chrono::Duration::seconds(800));
    assert!(next < before + chrono::Duration::seconds(1000));
    assert_eq!(
        settings::get_deployment_interval(&pool, "guild-test")
            .await
            .expect("setting"),
        Duration::from_secs(900)
    );
}

#[tokio::test]
async fn round_resets_strike_mode_and_rearms() {
    let (queue, _fake, _pool) = setup_engine(Duration::from_secs(1)).await;

    let first_round = queue.next_game().await;
    assert!(queue.toggle_strike_mode().await);

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let second_round = queue.next_game().await;
    assert!(second_round > first_round, "countdown must re-arm after a round");
    assert!(
        queue.toggle_strike_mode().await,
        "strike mode should have been reset by the round"
    );
}

#[tokio::test]
async fn panel_refreshes_are_coalesced() {
    let (queue, fake, pool) = setup_engine(Duration::from_secs(3600)).await;

    queue
        .set_panel("chan-queue".to_string())
        .await
        .expect("set panel");
    let panel = QueueStatusMessageRow::get(&pool)
        .await
        .expect("query")
        .expect("panel row");
    assert_eq!(panel.channel, "chan-queue");

    queue.join("player-1").await.expect("join");
    queue.join("player-2").await.expect("join");
    queue.join("player-3").await.expect("join");

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let state = fake.state();
    let panels: Vec<_> = state
        .edits
        .iter()
        .filter_map(|(_, render)| match render {
            Render::QueuePanel(view) => Some(view),
            _ => None,
        })
        .collect();
    assert!(
        panels.len() < 3,
        "three joins in a burst must coalesce, saw {} edits",
        panels.len()
    );
    let last = panels.last().expect("at least one refresh");
    assert_eq!(last.players.len(), 3, "deferred refresh carries the latest state");
}

#[tokio::test]
async fn panel_resolves_display_names() {
    let (queue, fake, _pool) = setup_engine(Duration::from_secs(3600)).await;
    {
        let mut state = fake.state();
        state.names.insert("host-1".to_string(), "General Brasch".to_string());
        state.unknown_users.insert("player-1".to_string());
    }

    queue.join_as_host("host-1").await.expect("host");
    queue.join("player-1").await.expect("player");
    queue
        .set_panel("chan-queue".to_string())
        .await
        .expect("set panel");

    let state = fake.state();
    let (_, render, _) = state.sent.last().expect("panel sent");
    let Render::QueuePanel(view) = render else {
        panic!("expected a queue panel, got {render:?}");
    };
    assert_eq!(view.hosts, vec!["General Brasch".to_string()]);
    assert_eq!(view.players, vec!["Unknown User".to_string()]);
}

#[tokio::test]
async fn full_group_launches_and_clears_queue() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    enqueue(&pool, "host-a", true, 0).await;
    enqueue(&pool, "player-b", false, 1).await;
    enqueue(&pool, "player-c", false, 2).await;
    enqueue(&pool, "player-d", false, 3).await;

    let started = matchmaker.run(false).await.expect("round");
    assert_eq!(started, 1);
    assert_eq!(queue_count(&pool).await, 0);

    let state = fake.state();
    assert_eq!(state.rooms_created.len(), 1);
    let room = &state.rooms_created[0];
    assert_eq!(room.category, "cat-1");
    assert_eq!(room.capacity, 4);
    assert_eq!(room.granted, vec!["host-a", "player-b", "player-c", "player-d"]);
    assert!(room.name.starts_with("🔊| HOTDROP "));

    // Host and every player got their marching orders.
    assert_eq!(state.dms.len(), 4);
    assert!(state
        .dms
        .iter()
        .all(|(_, notice)| matches!(notice, Notice::HotDropAssigned { .. })));

    // And the departure channel heard about it.
    assert!(state.sent.iter().any(|(channel, render, _)| {
        channel == "chan-departure" && matches!(render, Render::HotDropAnnouncement(_))
    }));
}

#[tokio::test]
async fn short_group_is_skipped_and_stays_queued() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    enqueue(&pool, "host-a", true, 0).await;
    enqueue(&pool, "player-b", false, 1).await;

    let started = matchmaker.run(false).await.expect("round");
    assert_eq!(started, 0);
    assert_eq!(queue_count(&pool).await, 2);
    assert!(fake.state().rooms_created.is_empty());
}

#[tokio::test]
async fn normal_rounds_assign_in_arrival_order() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    enqueue(&pool, "host-a", true, 0).await;
    for (n, user) in ["first", "second", "third", "fourth"].into_iter().enumerate() {
        enqueue(&pool, user, false, 10 + n as i64).await;
    }

    matchmaker.run(false).await.expect("round");

    let state = fake.state();
    assert_eq!(
        state.rooms_created[0].granted,
        vec!["host-a", "first", "second", "third"]
    );
    drop(state);
    // The player who missed the cut is still waiting.
    assert!(QueueRow::find_user(&pool, "fourth")
        .await
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn voice_categories_rotate_between_groups() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    enqueue(&pool, "host-a", true, 0).await;
    enqueue(&pool, "host-b", true, 1).await;
    for n in 0..6 {
        enqueue(&pool, &format!("player-{n}"), false, 10 + n).await;
    }

    let started = matchmaker.run(false).await.expect("round");
    assert_eq!(started, 2);

    let state = fake.state();
    assert_eq!(state.rooms_created[0].category, "cat-1");
    assert_eq!(state.rooms_created[1].category, "cat-2");
}

#[tokio::test]
async fn failed_room_leaves_group_queued() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    fake.state().fail_rooms = true;
    enqueue(&pool, "host-a", true, 0).await;
    enqueue(&pool, "player-b", false, 1).await;
    enqueue(&pool, "player-c", false, 2).await;

    let started = matchmaker.run(false).await.expect("round survives");
    assert_eq!(started, 0);
    assert_eq!(queue_count(&pool).await, 3, "nobody leaves the queue without a room");
}

#[tokio::test]
async fn expired_voice_rooms_are_reclaimed() {
    let (mut matchmaker, fake, pool) = setup_matchmaker().await;
    VoiceRoomRow::insert(&pool, "room-old", Utc::now().timestamp_millis() - 1000)
        .await
        .expect("stale room");
    VoiceRoomRow::insert(
        &pool,
        "room-fresh",
        Utc::now().timestamp_millis() + 3_600_000,
    )
    .await
    .expect("fresh room");

    matchmaker.run(false).await.expect("round");

    let state = fake.state();
    assert_eq!(state.rooms_deleted.len(), 1);
    assert_eq!(state.rooms_deleted[0].0, "room-old");
    drop(state);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voice_room")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(remaining, 1);
}
