//! Pool lifecycle scenarios against the fake host.

use std::sync::Arc;
use std::time::Duration;

use ghostpilot_browser_control::testing::FakeHost;
use ghostpilot_context_pool::{
    AcquireRequest, GhostContextPool, PoolConfig, PoolError, PoolEvent, PoolEventKind,
};
use ghostpilot_core_types::{ContextId, Priority, TaskId};
use serde_json::json;

fn request(task: &str, priority: Priority) -> AcquireRequest {
    AcquireRequest {
        task_id: TaskId::new(task).unwrap(),
        priority,
    }
}

async fn pool_with(min: usize, max: usize) -> (Arc<GhostContextPool>, Arc<FakeHost>) {
    let host = FakeHost::new();
    let pool = GhostContextPool::new(
        PoolConfig {
            min,
            max,
            auto_replenish: true,
            warm_retry_backoff: Duration::from_millis(50),
            ..Default::default()
        },
        host.clone(),
    );
    pool.initialize().await.unwrap();
    (pool, host)
}

async fn drain(rx: &mut tokio::sync::broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn acquire_before_initialize_is_rejected() {
    let host = FakeHost::new();
    let pool = GhostContextPool::new(PoolConfig::default(), host);
    let err = pool
        .acquire_ghost_tab(request("t0", Priority::Foreground))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::NotInitialized));
}

#[tokio::test]
async fn warm_pool_assignment_scenario() {
    let (pool, _host) = pool_with(2, 3).await;
    let mut events = pool.subscribe();

    let lease1 = pool
        .acquire_ghost_tab(request("t1", Priority::Foreground))
        .await
        .unwrap();
    let lease2 = pool
        .acquire_ghost_tab(request("t2", Priority::Foreground))
        .await
        .unwrap();
    assert!(lease1.assignment_wait_ms <= 10);
    assert!(lease2.assignment_wait_ms <= 10);
    assert_ne!(lease1.context_id, lease2.context_id);

    // Third acquire has no warm slot yet; the replenish loop warms the
    // cold slot and hands it over.
    let lease3 = pool
        .acquire_ghost_tab(request("t3", Priority::Foreground))
        .await
        .unwrap();
    assert_eq!(pool.snapshot().in_use, 3);

    // Fourth must queue until a release.
    let pool_clone = pool.clone();
    let fourth = tokio::spawn(async move {
        pool_clone
            .acquire_ghost_tab(request("t4", Priority::Foreground))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.snapshot().queued, 1);

    pool.release(&lease2).await.unwrap();
    let lease4 = fourth.await.unwrap().unwrap();
    assert_eq!(lease4.context_id, lease2.context_id);

    let seen = drain(&mut events).await;
    let dispatched_queued = seen.iter().any(|e| {
        e.kind == PoolEventKind::Dispatched
            && e.was_queued
            && e.task_id.as_str() == "t4"
    });
    assert!(dispatched_queued, "queued dispatch event missing: {seen:?}");

    pool.release(&lease1).await.unwrap();
    pool.release(&lease3).await.unwrap();
    pool.release(&lease4).await.unwrap();

    let snapshot = pool.snapshot();
    assert!(snapshot.is_consistent());
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.queued, 0);

    let telemetry = pool.telemetry();
    assert_eq!(telemetry.warm_assignment_count + telemetry.queued_assignment_count, 4);
    pool.shutdown().await;
}

#[tokio::test]
async fn foreground_preempts_queued_background() {
    let (pool, _host) = pool_with(2, 2).await;

    let lease1 = pool
        .acquire_ghost_tab(request("busy1", Priority::Foreground))
        .await
        .unwrap();
    let _lease2 = pool
        .acquire_ghost_tab(request("busy2", Priority::Foreground))
        .await
        .unwrap();

    // Background waiter enters the queue first.
    let pool_bg = pool.clone();
    let background = tokio::spawn(async move {
        pool_bg
            .acquire_ghost_tab(request("bg", Priority::Background))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let pool_fg = pool.clone();
    let foreground = tokio::spawn(async move {
        pool_fg
            .acquire_ghost_tab(request("fg", Priority::Foreground))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(pool.snapshot().queued, 2);

    pool.release(&lease1).await.unwrap();
    let fg_lease = foreground.await.unwrap().unwrap();
    assert_eq!(fg_lease.context_id, lease1.context_id);

    // Background is still waiting.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(pool.snapshot().queued, 1);

    pool.release(&fg_lease).await.unwrap();
    let bg_lease = background.await.unwrap().unwrap();
    pool.release(&bg_lease).await.unwrap();
    pool.shutdown().await;
}

#[tokio::test]
async fn crashed_context_recycles_and_rewarms() {
    let (pool, host) = pool_with(1, 2).await;
    let warms_before = host.warm_count();

    let lease = pool
        .acquire_ghost_tab(request("crashy", Priority::Foreground))
        .await
        .unwrap();
    let context = lease.context_id.clone();

    // Crash the renderer behind the lease.
    let transport = host.transport_for(&context).unwrap();
    transport.push_event("Inspector.targetCrashed", json!({}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(lease.session().get_last_crash_event().is_some());

    pool.release(&lease).await.unwrap();

    // Replenish loop re-warms the recycled slot.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = pool.snapshot();
    assert!(snapshot.is_consistent());
    assert!(snapshot.available >= 1);
    assert!(host.warm_count() > warms_before, "slot was not re-warmed");

    // The re-warmed context runs on a fresh transport.
    let fresh = host.transport_for(&context).unwrap();
    assert!(!Arc::ptr_eq(&fresh, &transport));
    pool.shutdown().await;
}

#[tokio::test]
async fn release_is_idempotent() {
    let (pool, _host) = pool_with(1, 1).await;
    let lease = pool
        .acquire_ghost_tab(request("t", Priority::Foreground))
        .await
        .unwrap();

    pool.release(&lease).await.unwrap();
    pool.release(&lease).await.unwrap();

    let snapshot = pool.snapshot();
    assert!(snapshot.is_consistent());
    assert_eq!(snapshot.available, 1);
    assert_eq!(snapshot.in_use, 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_queued_waiters() {
    let (pool, _host) = pool_with(1, 1).await;
    let _lease = pool
        .acquire_ghost_tab(request("holder", Priority::Foreground))
        .await
        .unwrap();

    let pool_clone = pool.clone();
    let waiter = tokio::spawn(async move {
        pool_clone
            .acquire_ghost_tab(request("stuck", Priority::Background))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    pool.shutdown().await;
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::ShuttingDown)));
}

#[tokio::test]
async fn warm_failure_retries_until_available() {
    let host = FakeHost::new();
    host.fail_next_warms(1);
    let pool = GhostContextPool::new(
        PoolConfig {
            min: 1,
            max: 1,
            auto_replenish: true,
            warm_retry_backoff: Duration::from_millis(20),
            ..Default::default()
        },
        host.clone(),
    );
    pool.initialize().await.unwrap();

    // Initial warm failed; the loop retries until the slot comes up.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let snapshot = pool.snapshot();
    assert!(snapshot.is_consistent());
    assert_eq!(snapshot.available, 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn destroy_context_forces_recycle() {
    let (pool, _host) = pool_with(1, 1).await;
    let lease = pool
        .acquire_ghost_tab(request("doomed", Priority::Foreground))
        .await
        .unwrap();
    let context = lease.context_id.clone();

    pool.destroy_context(&context).await.unwrap();
    let snapshot = pool.snapshot();
    assert!(snapshot.is_consistent());
    assert_eq!(snapshot.in_use, 0);

    // A later release of the dead lease is a no-op.
    pool.release(&lease).await.unwrap();
    assert!(pool.snapshot().is_consistent());

    assert!(matches!(
        pool.destroy_context(&ContextId::slot(99)).await,
        Err(PoolError::UnknownContext(_))
    ));
    pool.shutdown().await;
}
