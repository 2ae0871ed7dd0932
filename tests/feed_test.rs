//! End-to-end feed behaviour: scheduler, session, buffer policy and cache
//! wired together with a simulated engine on a paused clock.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{clip_url, pos, FailingStore, FeedHarness, SimFactory, Surfaces, TestViewport};
use feedpreview::scheduler::ScrollState;
use feedpreview::{Config, Error, FeedPreview, PlayStatus};
use fp_playback::SessionState;

async fn expect_status(statuses: &mut feedpreview::StatusStream) -> PlayStatus {
    tokio::time::timeout(Duration::from_secs(30), statuses.next())
        .await
        .expect("status within 30s")
        .expect("session alive")
}

#[tokio::test(start_paused = true)]
async fn settled_range_plays_in_order() {
    let h = FeedHarness::new(6);
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(2, 4));

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();

    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(2)));
    let started_at = tokio::time::Instant::now();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(2)));
    // Ended fires on the first watchdog tick at or past the 4s cap.
    let played = started_at.elapsed();
    assert!(played >= Duration::from_secs(4), "ended after {played:?}");
    assert!(played < Duration::from_millis(4600), "ended after {played:?}");

    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(3)));
    assert_eq!(feed.binder.last_play(), Some(pos(3)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(3)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(4)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(4)));

    // Queue exhausted: nothing else plays.
    assert!(tokio::time::timeout(Duration::from_secs(10), statuses.next())
        .await
        .is_err());
    assert_eq!(h.factory.loads(), vec![clip_url(2), clip_url(3), clip_url(4)]);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.factory.volume(), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn drag_during_playback_pauses_and_holds() {
    let h = FeedHarness::new(6);
    let mut statuses = h.preview.session().subscribe();
    let viewport = TestViewport::showing(3, 5);
    let feed = h.attach(viewport.clone());

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(3)));

    viewport.set_scroll_state(ScrollState::Dragging);
    feed.scheduler.scroll_state_changed(ScrollState::Dragging).unwrap();
    let queue = feed.scheduler.snapshot().await.unwrap();
    assert!(queue.queued.is_empty());
    assert_eq!(queue.now_playing, None);

    let session = h.preview.session().snapshot().await.unwrap();
    assert_eq!(session.state, SessionState::Idle);
    assert_eq!(session.position, None);
    assert_eq!(h.surfaces.last().as_deref(), Some("unbind #3"));
    assert_eq!(feed.binder.last_play(), None);

    // No Ended and no further loads until the next settle.
    assert!(tokio::time::timeout(Duration::from_secs(10), statuses.next())
        .await
        .is_err());
    assert_eq!(h.factory.loads(), vec![clip_url(3)]);

    viewport.set_scroll_state(ScrollState::Idle);
    viewport.set_visible(Some(4), Some(4));
    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(4)));
}

#[tokio::test(start_paused = true)]
async fn storage_failure_falls_back_to_network() {
    let h = FeedHarness::with_store(3, HashMap::new(), || {
        Ok(Arc::new(FailingStore) as Arc<dyn fp_cache::ByteStore>)
    });
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(1, 1));

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(1)));

    assert!(!h.cache.contains(&clip_url(1)));
    assert_eq!(h.cache.stored_bytes(), 0);
    assert_eq!(h.fetcher.calls(&clip_url(1)), 1);
    assert!(h.cache.stats().bypasses >= 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_cache_directory_falls_back_to_network() {
    let h = FeedHarness::with_store(2, HashMap::new(), || {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
    });
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(0, 0));

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(0)));
    assert!(h.cache.is_empty());
}

#[test]
fn misordered_buffer_thresholds_are_fatal() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.dir = dir.path().to_path_buf();
    config.buffer.min_buffer_ms = 5000;
    config.buffer.max_buffer_ms = 3000;

    let result = FeedPreview::new(
        config,
        Arc::new(SimFactory::default()),
        Arc::new(Surfaces::default()),
    );
    assert_matches!(result.err(), Some(Error::Configuration(msg)) if msg.contains("maxBufferMs"));
}

#[tokio::test(start_paused = true)]
async fn failed_clip_advances_to_next() {
    let h = FeedHarness::new(4);
    let mut statuses = h.preview.session().subscribe();
    // Position 1 points at a URL the network does not have.
    let mut items = h.items.clone();
    items[1] = "https://cdn.test/clips/missing.mp4".to_string();
    let feed = h.preview.attach(TestViewport::showing(1, 2), items);

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(1)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(2)));
}

#[tokio::test(start_paused = true)]
async fn short_clip_ends_naturally_before_cap() {
    let durations = HashMap::from([(clip_url(0), Duration::from_secs(2))]);
    let store: Arc<dyn fp_cache::ByteStore> = Arc::new(fp_cache::MemoryByteStore::new());
    let h = FeedHarness::with_store(2, durations, move || Ok(Arc::clone(&store)));
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(0, 1));

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(0)));
    let started_at = tokio::time::Instant::now();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(0)));
    assert!(started_at.elapsed() < Duration::from_secs(3));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(1)));
}

#[tokio::test(start_paused = true)]
async fn replaying_a_clip_is_served_from_cache() {
    let h = FeedHarness::new(3);
    let mut statuses = h.preview.session().subscribe();
    let viewport = TestViewport::showing(0, 0);
    let feed = h.attach(viewport.clone());

    for _ in 0..3 {
        feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
        assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(0)));
        assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(0)));
    }

    assert_eq!(h.fetcher.calls(&clip_url(0)), 1);
    assert!(h.cache.contains(&clip_url(0)));
    assert_eq!(h.cache.stats().hits, 2);
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn many_retargets_share_one_engine() {
    let h = FeedHarness::new(20);
    let viewport = TestViewport::new();
    let feed = h.attach(viewport.clone());

    for first in 0..15 {
        viewport.set_visible(Some(first), Some(first + 4));
        feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        viewport.set_scroll_state(ScrollState::Dragging);
        feed.scheduler.scroll_state_changed(ScrollState::Dragging).unwrap();
        viewport.set_scroll_state(ScrollState::Idle);
    }
    feed.scheduler.snapshot().await.unwrap();
    h.preview.session().snapshot().await.unwrap();

    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.preview.session().engines_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_engine() {
    let h = FeedHarness::new(2);
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(0, 0));
    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(0)));

    feed.scheduler.detach().await;
    let session = h.preview.session().snapshot().await.unwrap();
    assert_eq!(session.state, SessionState::Idle);
    assert_eq!(session.position, None);
    assert_eq!(h.surfaces.last().as_deref(), Some("unbind #0"));
    // The watchdog went with the target: no late Ended for #0.
    assert!(tokio::time::timeout(Duration::from_secs(10), statuses.next())
        .await
        .is_err());

    h.preview.shutdown().await;
    assert_eq!(h.factory.log.lock().last().map(String::as_str), Some("release"));
    assert_matches!(h.preview.session().snapshot().await, Err(Error::SessionClosed));
}

#[tokio::test(start_paused = true)]
async fn small_byte_budget_still_fills_preview_window() {
    let mut config = Config::default();
    config.buffer.target_buffer_bytes = Some(4 * fp_playback::SEGMENT_SIZE);
    let h = FeedHarness::with_config(3, config);
    let mut statuses = h.preview.session().subscribe();
    let feed = h.attach(TestViewport::showing(0, 2));

    feed.scheduler.scroll_state_changed(ScrollState::Idle).unwrap();
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(0)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Ended(pos(0)));
    assert_eq!(expect_status(&mut statuses).await, PlayStatus::Started(pos(1)));
}
