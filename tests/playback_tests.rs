// Playback control surface and reconciliation: play/pause/resume/stop,
// volume handling, transcoder reclamation, and the radio/catalog split in
// end-of-stream and error handling.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use voicekeeper::testing::{MockEngineFactory, MockTranscoder, MockTransport};
use voicekeeper::{
    ChannelId, PlayerEvent, PlayerState, StreamDescriptor, TenantId, Timing, VoiceError,
    VoiceSessionManager,
};

fn fast_timing() -> Timing {
    Timing {
        join_timeout: Duration::from_millis(500),
        recovery_window: Duration::from_millis(100),
        idle_restart: Duration::from_millis(50),
        error_backoff: Duration::from_millis(80),
        rejoin_delay: Duration::from_millis(60),
    }
}

struct Harness {
    manager: VoiceSessionManager,
    engines: Arc<MockEngineFactory>,
    transcoder: Arc<MockTranscoder>,
}

fn harness() -> Harness {
    let transport = Arc::new(MockTransport::new());
    let engines = Arc::new(MockEngineFactory::new());
    let transcoder = Arc::new(MockTranscoder::new());
    let manager = VoiceSessionManager::new(
        transport,
        engines.clone(),
        transcoder.clone(),
        fast_timing(),
    );
    Harness {
        manager,
        engines,
        transcoder,
    }
}

const TENANT: TenantId = TenantId(7);
const CHANNEL: ChannelId = ChannelId(42);

fn radio(url: &str) -> StreamDescriptor {
    StreamDescriptor::Radio {
        url: url.to_string(),
        station: "Test FM".to_string(),
    }
}

fn catalog(url: &str) -> StreamDescriptor {
    StreamDescriptor::Catalog {
        url: url.to_string(),
        title: "Track".to_string(),
        artist: "Artist".to_string(),
        metadata: serde_json::json!({ "duration_secs": 180 }),
    }
}

async fn wait_for_player(
    manager: &VoiceSessionManager,
    tenant: TenantId,
    state: PlayerState,
    within: Duration,
) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if manager.player_state(tenant).await == Some(state) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn play_stream_spawns_transcoder_and_reaches_playing() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();

    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();

    assert_eq!(h.transcoder.spawn_count(), 1);
    assert_eq!(h.transcoder.live_count(), 1);
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, Some(radio("http://radio.example/a")));
    assert!(snapshot.transcoder_live);
}

#[tokio::test]
async fn play_without_session_is_rejected() {
    let h = harness();
    let result = h.manager.play_stream(TENANT, radio("http://x")).await;
    assert!(matches!(result, Err(VoiceError::NoSession(_))));
    assert_eq!(h.transcoder.spawn_count(), 0);
}

#[tokio::test]
async fn switching_streams_leaves_exactly_one_transcoder() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();

    h.manager
        .play_stream(TENANT, radio("http://radio.example/first"))
        .await
        .unwrap();
    h.manager
        .play_stream(TENANT, radio("http://radio.example/second"))
        .await
        .unwrap();

    assert_eq!(h.transcoder.spawn_count(), 2);
    assert_eq!(h.transcoder.live_count(), 1, "old transcoder must be reclaimed");
    assert_eq!(
        h.transcoder.last_spawned_url().as_deref(),
        Some("http://radio.example/second")
    );
    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, Some(radio("http://radio.example/second")));
}

#[tokio::test]
async fn pause_resume_round_trip_keeps_descriptor() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    let stream = radio("http://radio.example/a");
    h.manager.play_stream(TENANT, stream.clone()).await.unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    assert!(h.manager.pause(TENANT).await);
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Paused));
    // Pausing twice is a precondition miss, not an error.
    assert!(!h.manager.pause(TENANT).await);

    assert!(h.manager.resume(TENANT).await);
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Playing));

    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, Some(stream));
    assert_eq!(h.transcoder.live_count(), 1);
}

#[tokio::test]
async fn pause_and_resume_require_matching_state() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();

    // Idle session: neither applies.
    assert!(!h.manager.pause(TENANT).await);
    assert!(!h.manager.resume(TENANT).await);

    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );
    // Resume while already playing does nothing.
    assert!(!h.manager.resume(TENANT).await);
}

#[tokio::test]
async fn stop_clears_stream_and_reclaims_transcoder() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    assert!(h.manager.stop(TENANT).await);
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
    assert_eq!(h.transcoder.live_count(), 0);
    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, None);

    // Already idle: nothing to stop.
    assert!(!h.manager.stop(TENANT).await);
}

#[tokio::test]
async fn stop_from_paused_works() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );
    assert!(h.manager.pause(TENANT).await);

    assert!(h.manager.stop(TENANT).await);
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
}

#[tokio::test]
async fn explicit_stop_is_not_mistaken_for_end_of_stream() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    assert!(h.manager.stop(TENANT).await);

    // The engine reports Idle after stop; the restart timers must not fire
    // a radio self-heal for it.
    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.transcoder.spawn_count(), 1);
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
}

#[tokio::test]
async fn volume_is_clamped_and_applied_live() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();

    assert!(h.manager.set_volume(TENANT, 3.5).await);
    assert_eq!(h.manager.volume(TENANT).await, 2.0);
    assert_eq!(h.engines.probe(TENANT).unwrap().volume(), 2.0);

    assert!(h.manager.set_volume(TENANT, -1.0).await);
    assert_eq!(h.manager.volume(TENANT).await, 0.0);
    assert_eq!(h.engines.probe(TENANT).unwrap().volume(), 0.0);
}

#[tokio::test]
async fn volume_outlives_the_session() {
    let h = harness();

    // No session yet: recorded but not applied anywhere.
    assert!(!h.manager.set_volume(TENANT, 0.5).await);
    assert_eq!(h.manager.volume(TENANT).await, 0.5);

    // A new session picks the stored value up immediately.
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    assert_eq!(h.engines.probe(TENANT).unwrap().volume(), 0.5);

    h.manager.leave(TENANT).await;
    assert_eq!(h.manager.volume(TENANT).await, 0.5);
}

#[tokio::test]
async fn radio_idle_self_heals_quickly() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    let stream = radio("http://radio.example/a");
    h.manager.play_stream(TENANT, stream.clone()).await.unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    // Simulate the source drying up without an explicit stop.
    let probe = h.engines.probe(TENANT).unwrap();
    probe.emit(PlayerEvent::StateChanged(PlayerState::Idle)).await;
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Idle, Duration::from_millis(500)).await,
        "injected idle must be observed before the restart"
    );

    assert!(
        wait_for_player(
            &h.manager,
            TENANT,
            PlayerState::Playing,
            Duration::from_millis(1500)
        )
        .await,
        "radio stream must restart after going idle"
    );
    assert_eq!(h.transcoder.spawn_count(), 2);
    assert_eq!(h.transcoder.live_count(), 1);
    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, Some(stream));
}

#[tokio::test]
async fn catalog_idle_ends_the_track() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, catalog("http://cdn.example/track.opus"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    let probe = h.engines.probe(TENANT).unwrap();
    probe.emit(PlayerEvent::StateChanged(PlayerState::Idle)).await;

    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
    assert_eq!(h.transcoder.spawn_count(), 1, "tracks do not restart");
    assert_eq!(h.transcoder.live_count(), 0);
    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.stream, None);
}

#[tokio::test]
async fn radio_error_retries_after_backoff() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    let probe = h.engines.probe(TENANT).unwrap();
    probe
        .emit(PlayerEvent::Fatal("source reset by peer".to_string()))
        .await;
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Idle, Duration::from_millis(500)).await,
        "the error must knock the player idle before the retry"
    );

    assert!(
        wait_for_player(
            &h.manager,
            TENANT,
            PlayerState::Playing,
            Duration::from_secs(1)
        )
        .await,
        "radio stream must retry after a fatal error"
    );
    assert_eq!(h.transcoder.spawn_count(), 2);
}

#[tokio::test]
async fn catalog_error_abandons_playback() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(TENANT, catalog("http://cdn.example/track.opus"))
        .await
        .unwrap();
    assert!(
        wait_for_player(&h.manager, TENANT, PlayerState::Playing, Duration::from_secs(1)).await
    );

    let probe = h.engines.probe(TENANT).unwrap();
    probe.emit(PlayerEvent::Fatal("decode failure".to_string())).await;

    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
    assert_eq!(h.transcoder.spawn_count(), 1);
    assert_eq!(h.transcoder.live_count(), 0);
}

#[tokio::test]
async fn spawn_failure_leaves_a_clean_session() {
    let h = harness();
    h.manager.join(TENANT, CHANNEL).await.unwrap();

    h.transcoder.fail_next_spawn();
    let result = h
        .manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await;
    assert!(matches!(result, Err(VoiceError::SubprocessSpawnFailure(_))));

    assert!(h.manager.has_session(TENANT).await, "session survives a spawn failure");
    assert_eq!(h.manager.player_state(TENANT).await, Some(PlayerState::Idle));
    assert_eq!(h.transcoder.live_count(), 0);

    // The session stays usable.
    h.manager
        .play_stream(TENANT, radio("http://radio.example/a"))
        .await
        .unwrap();
    assert_eq!(h.transcoder.live_count(), 1);
}
