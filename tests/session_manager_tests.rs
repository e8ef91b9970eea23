// Integration tests for the session registry: join/leave lifecycle,
// idempotence, timeout rollback, and connection-loss teardown.

use std::sync::Arc;
use std::time::Duration;
use voicekeeper::testing::{MockEngineFactory, MockTranscoder, MockTransport};
use voicekeeper::{ChannelId, ConnectionState, TenantId, Timing, VoiceError, VoiceSessionManager};

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
    transport: Arc<MockTransport>,
    engines: Arc<MockEngineFactory>,
    transcoder: Arc<MockTranscoder>,
}

fn harness_with(transport: MockTransport) -> Harness {
    let transport = Arc::new(transport);
    let engines = Arc::new(MockEngineFactory::new());
    let transcoder = Arc::new(MockTranscoder::new());
    let manager = VoiceSessionManager::new(
        transport.clone(),
        engines.clone(),
        transcoder.clone(),
        fast_timing(),
    );
    Harness {
        manager,
        transport,
        engines,
        transcoder,
    }
}

fn harness() -> Harness {
    harness_with(MockTransport::new())
}

const TENANT: TenantId = TenantId(7);
const CHANNEL: ChannelId = ChannelId(42);

#[tokio::test]
async fn join_creates_exactly_one_connection() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();

    assert!(h.manager.has_session(TENANT).await);
    assert_eq!(h.transport.open_count(), 1);
    assert_eq!(h.transport.live_connections(), 1);

    // Same target again: reused, not rebuilt.
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    assert_eq!(h.transport.open_count(), 1);
    assert_eq!(h.transport.live_connections(), 1);
}

#[tokio::test]
async fn join_to_a_different_channel_rebuilds_the_connection() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager.join(TENANT, ChannelId(43)).await.unwrap();

    assert_eq!(h.transport.open_count(), 2);
    assert_eq!(h.transport.destroy_count(), 1);
    assert_eq!(h.transport.live_connections(), 1);

    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.channel, ChannelId(43));
}

#[tokio::test]
async fn join_timeout_rolls_back_completely() {
    // A transport that never reaches Ready.
    let h = harness_with(MockTransport::manual());

    let result = h.manager.join(TENANT, CHANNEL).await;
    assert!(matches!(result, Err(VoiceError::ConnectionTimeout(_))));

    assert!(!h.manager.has_session(TENANT).await);
    assert_eq!(h.transport.destroy_count(), 1, "half-open connection must be destroyed");
    assert_eq!(h.transport.live_connections(), 0);
}

#[tokio::test]
async fn join_denied_channel_leaves_no_partial_state() {
    let h = harness();
    h.transport.mark_denied(CHANNEL);

    let result = h.manager.join(TENANT, CHANNEL).await;
    assert!(matches!(result, Err(VoiceError::PermissionDenied(_))));

    assert!(!h.manager.has_session(TENANT).await);
    assert_eq!(h.transport.open_count(), 0, "no connection may be attempted");
}

#[tokio::test]
async fn join_missing_channel_is_rejected() {
    let h = harness();
    h.transport.mark_missing(CHANNEL);

    let result = h.manager.join(TENANT, CHANNEL).await;
    assert!(matches!(result, Err(VoiceError::ChannelNotFound(_))));
    assert!(!h.manager.has_session(TENANT).await);
}

#[tokio::test]
async fn concurrent_joins_share_one_connection() {
    let h = harness();

    let first = h.manager.clone();
    let second = h.manager.clone();
    let (a, b) = tokio::join!(first.join(TENANT, CHANNEL), second.join(TENANT, CHANNEL));
    a.unwrap();
    b.unwrap();

    assert_eq!(h.transport.open_count(), 1);
    assert_eq!(h.transport.live_connections(), 1);
}

#[tokio::test]
async fn tenants_do_not_interfere() {
    let h = harness();

    h.manager.join(TenantId(1), ChannelId(10)).await.unwrap();
    h.manager.join(TenantId(2), ChannelId(20)).await.unwrap();

    assert_eq!(h.transport.live_connections(), 2);

    assert!(h.manager.leave(TenantId(1)).await);
    assert!(!h.manager.has_session(TenantId(1)).await);
    assert!(h.manager.has_session(TenantId(2)).await);
}

#[tokio::test]
async fn leave_is_idempotent_and_join_works_after() {
    let h = harness();

    // Leave with no session: clean false, no error.
    assert!(!h.manager.leave(TENANT).await);

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    assert!(h.manager.leave(TENANT).await);
    assert!(!h.manager.leave(TENANT).await);

    // A fresh join still works normally.
    h.manager.join(TENANT, CHANNEL).await.unwrap();
    assert!(h.manager.has_session(TENANT).await);
}

#[tokio::test]
async fn leave_releases_all_resources() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.manager
        .play_stream(
            TENANT,
            voicekeeper::StreamDescriptor::Radio {
                url: "http://radio.example/a".to_string(),
                station: "A".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.transcoder.live_count(), 1);

    assert!(h.manager.leave(TENANT).await);

    assert!(!h.manager.has_session(TENANT).await);
    assert_eq!(h.transcoder.live_count(), 0, "transcoder must be reclaimed");
    assert_eq!(h.transport.live_connections(), 0);
    let calls = h.engines.probe(TENANT).unwrap().calls();
    assert!(calls.contains(&"stop"), "engine must be stopped on leave");
}

#[tokio::test]
async fn shutdown_destroys_sessions_but_keeps_volumes() {
    let h = harness();

    h.manager.join(TenantId(1), ChannelId(10)).await.unwrap();
    h.manager.join(TenantId(2), ChannelId(20)).await.unwrap();
    h.manager.set_volume(TenantId(1), 0.3).await;

    h.manager.shutdown().await;

    assert!(!h.manager.has_session(TenantId(1)).await);
    assert!(!h.manager.has_session(TenantId(2)).await);
    assert_eq!(h.transport.live_connections(), 0);

    // Volume is durable relative to session lifecycle.
    assert_eq!(h.manager.volume(TenantId(1)).await, 0.3);
}

#[tokio::test]
async fn unrecovered_disconnect_destroys_the_session() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.transport.emit(TENANT, ConnectionState::Disconnected).await;

    // Recovery window is 100ms in the test timing; wait it out.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!h.manager.has_session(TENANT).await);
    assert_eq!(h.transport.live_connections(), 0);
}

#[tokio::test]
async fn disconnect_recovered_within_window_survives() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.transport.emit(TENANT, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.transport.emit(TENANT, ConnectionState::Ready).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.manager.has_session(TENANT).await, "recovered session must be kept");
    let snapshot = h.manager.snapshot(TENANT).await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Ready);
}

#[tokio::test]
async fn each_disconnect_gets_its_own_full_recovery_window() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();

    // First episode recovers; a second one starts shortly before the first
    // episode's 100ms timer fires.
    h.transport.emit(TENANT, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.transport.emit(TENANT, ConnectionState::Ready).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.transport.emit(TENANT, ConnectionState::Disconnected).await;

    // 120ms after the first disconnect the stale timer has fired, while the
    // second episode is only 50ms old and must still be within its window.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        h.manager.has_session(TENANT).await,
        "a later disconnect must not be expired by an earlier episode's timer"
    );

    // Left unrecovered, the second episode's own timer tears it down.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!h.manager.has_session(TENANT).await);
}

#[tokio::test]
async fn destroyed_transport_tears_down_immediately() {
    let h = harness();

    h.manager.join(TENANT, CHANNEL).await.unwrap();
    h.transport.emit(TENANT, ConnectionState::Destroyed).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!h.manager.has_session(TENANT).await);
}
