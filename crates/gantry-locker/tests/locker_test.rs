//! Locker behavior against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gantry_api::ServiceRegistration;
use gantry_consul_client::{
    AgentServiceRegistration, CheckStatus, ConsulApi, KvPair, MemoryConsul, ServiceEntry,
    SessionCreateRequest,
};
use gantry_locker::{AcquireWait, ConsulLocker, ConsulLockerConfig, Locker, LockerError};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

fn test_config() -> ConsulLockerConfig {
    ConsulLockerConfig {
        session_ttl: Duration::from_millis(400),
        delay: Duration::ZERO,
        retry_timer: Duration::from_millis(50),
        ..Default::default()
    }
}

fn locker_on(store: &Arc<MemoryConsul>) -> ConsulLocker {
    ConsulLocker::with_api(store.clone(), test_config()).unwrap()
}

fn registration(id: &str) -> ServiceRegistration {
    ServiceRegistration {
        id: id.to_string(),
        name: "gantry-collector".to_string(),
        address: "10.0.0.5".to_string(),
        port: 7890,
        tags: vec!["router1".to_string()],
        ttl: Duration::from_millis(200),
    }
}

/// Store that fires `cancel` while an acquire is in flight
struct CancelOnAcquire {
    store: Arc<MemoryConsul>,
    cancel: CancellationToken,
}

#[async_trait]
impl ConsulApi for CancelOnAcquire {
    async fn create_session(
        &self,
        request: &SessionCreateRequest,
    ) -> gantry_consul_client::Result<String> {
        self.store.create_session(request).await
    }

    async fn renew_session(&self, session_id: &str) -> gantry_consul_client::Result<bool> {
        self.store.renew_session(session_id).await
    }

    async fn destroy_session(&self, session_id: &str) -> gantry_consul_client::Result<()> {
        self.store.destroy_session(session_id).await
    }

    async fn acquire(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> gantry_consul_client::Result<bool> {
        let acquired = self.store.acquire(key, value, session_id).await;
        self.cancel.cancel();
        acquired
    }

    async fn get_key(&self, key: &str) -> gantry_consul_client::Result<Option<KvPair>> {
        self.store.get_key(key).await
    }

    async fn list_keys(&self, prefix: &str) -> gantry_consul_client::Result<Vec<KvPair>> {
        self.store.list_keys(prefix).await
    }

    async fn delete_key(&self, key: &str) -> gantry_consul_client::Result<()> {
        self.store.delete_key(key).await
    }

    async fn register_service(
        &self,
        registration: &AgentServiceRegistration,
    ) -> gantry_consul_client::Result<()> {
        self.store.register_service(registration).await
    }

    async fn deregister_service(&self, service_id: &str) -> gantry_consul_client::Result<()> {
        self.store.deregister_service(service_id).await
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        output: &str,
        status: CheckStatus,
    ) -> gantry_consul_client::Result<()> {
        self.store.update_ttl(check_id, output, status).await
    }

    async fn health_service(
        &self,
        service: &str,
        tags: &[String],
        passing_only: bool,
    ) -> gantry_consul_client::Result<Vec<ServiceEntry>> {
        self.store.health_service(service, tags, passing_only).await
    }
}

// ============================================================================
// Lock Tests
// ============================================================================

#[tokio::test]
async fn test_not_initialized() {
    let locker = ConsulLocker::new();
    let err = locker
        .lock(&CancellationToken::new(), "k", b"v")
        .await
        .unwrap_err();
    assert!(matches!(err, LockerError::NotInitialized));
    assert!(locker.stop().await.is_ok());
}

#[tokio::test]
async fn test_mutual_exclusion() {
    let store = Arc::new(MemoryConsul::new());
    let first = locker_on(&store);
    let second = locker_on(&store);
    let cancel = CancellationToken::new();

    assert!(first.lock(&cancel, "gantry/targets/t1", b"c1").await.unwrap());
    assert!(first.is_locked("gantry/targets/t1").await.unwrap());

    let contender = CancellationToken::new();
    let waiter = {
        let contender = contender.clone();
        tokio::spawn(async move { second.lock(&contender, "gantry/targets/t1", b"c2").await })
    };
    sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    contender.cancel();
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(LockerError::Cancelled)));

    let values = first.list("gantry/targets/").await.unwrap();
    assert_eq!(values.get("gantry/targets/t1").map(String::as_str), Some("c1"));
    // refused attempts do not leak sessions
    assert_eq!(store.session_ids().len(), 1);
}

#[tokio::test]
async fn test_unlock_hands_over() {
    let store = Arc::new(MemoryConsul::new());
    let first = locker_on(&store);
    let second = locker_on(&store);
    let cancel = CancellationToken::new();

    first.lock(&cancel, "leader", b"c1").await.unwrap();
    let waiter = {
        let cancel = cancel.clone();
        let second = second.clone();
        tokio::spawn(async move { second.lock(&cancel, "leader", b"c2").await })
    };
    sleep(Duration::from_millis(100)).await;

    first.unlock("leader").await.unwrap();
    assert!(first.held_keys().await.is_empty());

    let acquired = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert!(acquired.unwrap());
    assert_eq!(second.held_keys().await, vec!["leader"]);
    assert_eq!(second.list("").await.unwrap()["leader"], "c2");
}

#[tokio::test]
async fn test_unlock_unknown_key() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    // an unreachable store proves no backend call is made
    store.set_unavailable(true);

    let err = locker.unlock("never-locked").await.unwrap_err();
    assert!(matches!(err, LockerError::UnknownKey(ref k) if k == "never-locked"));
}

#[tokio::test]
async fn test_cancel_during_acquire_gives_up_lock() {
    let store = Arc::new(MemoryConsul::new());
    let cancel = CancellationToken::new();
    let api = Arc::new(CancelOnAcquire {
        store: store.clone(),
        cancel: cancel.clone(),
    });
    let locker = ConsulLocker::with_api(api, test_config()).unwrap();

    let result = locker.lock(&cancel, "k", b"v").await;
    assert!(matches!(result, Err(LockerError::Cancelled)));
    assert!(locker.held_keys().await.is_empty());
    assert!(!store.has_key("k"));
    assert!(store.session_ids().is_empty());

    // the key is free for another instance right away
    let other = locker_on(&store);
    assert!(other.lock(&CancellationToken::new(), "k", b"c2").await.unwrap());
}

#[tokio::test]
async fn test_renewal_keeps_lock_past_ttl() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();

    locker.lock(&cancel, "k", b"v").await.unwrap();
    sleep(Duration::from_millis(1000)).await;

    assert!(store.has_key("k"));
    assert!(locker.is_locked("k").await.unwrap());
}

#[tokio::test]
async fn test_lock_twice_is_idempotent() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();

    assert!(locker.lock(&cancel, "k", b"v").await.unwrap());
    let again = timeout(Duration::from_millis(500), locker.lock(&cancel, "k", b"v")).await;
    assert!(again.unwrap().unwrap());
    assert_eq!(store.session_ids().len(), 1);
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();

    locker.lock(&cancel, "gantry/targets/a", b"c1").await.unwrap();
    locker.lock(&cancel, "gantry/targets/b", b"c1").await.unwrap();
    assert_eq!(locker.held_keys().await.len(), 2);

    locker.stop().await.unwrap();

    assert!(locker.held_keys().await.is_empty());
    assert!(!store.has_key("gantry/targets/a"));
    assert!(!store.has_key("gantry/targets/b"));
    assert!(store.session_ids().is_empty());
    assert!(matches!(
        locker.unlock("gantry/targets/a").await,
        Err(LockerError::UnknownKey(_))
    ));
}

#[tokio::test]
async fn test_stop_reports_first_error() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();

    locker.lock(&cancel, "a", b"c1").await.unwrap();
    locker.lock(&cancel, "b", b"c1").await.unwrap();
    store.set_unavailable(true);

    let err = locker.stop().await.unwrap_err();
    assert!(matches!(err, LockerError::Backend(_)));
    assert!(locker.held_keys().await.is_empty());
}

#[tokio::test]
async fn test_expired_holder_is_replaced() {
    let store = Arc::new(MemoryConsul::new());
    let crashed = locker_on(&store);
    let survivor = locker_on(&store);
    let cancel = CancellationToken::new();

    crashed.lock(&cancel, "k", b"c1").await.unwrap();
    let mut lost = crashed.keep_lock(&cancel, "k").await.unwrap();

    let waiter = {
        let cancel = cancel.clone();
        let survivor = survivor.clone();
        tokio::spawn(async move { survivor.lock(&cancel, "k", b"c2").await })
    };

    let holder = store.holder("k").unwrap();
    assert!(store.expire_session(&holder));

    let acquired = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert!(acquired.unwrap());

    let notice = timeout(Duration::from_secs(2), lost.recv()).await.unwrap();
    assert!(matches!(notice, Some(LockerError::LockLost(ref k)) if k == "k"));
    assert!(lost.recv().await.is_none());
}

#[tokio::test]
async fn test_keep_lock_closes_on_cancel() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();

    locker.lock(&cancel, "k", b"v").await.unwrap();
    let watch = CancellationToken::new();
    let mut lost = locker.keep_lock(&watch, "k").await.unwrap();
    sleep(Duration::from_millis(150)).await;

    watch.cancel();
    let closed = timeout(Duration::from_secs(1), lost.recv()).await.unwrap();
    assert!(closed.is_none());

    assert!(matches!(
        locker.keep_lock(&watch, "other").await,
        Err(LockerError::UnknownKey(_))
    ));
}

#[tokio::test]
async fn test_lock_many_notifies_each_key() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(4);

    locker
        .lock_many(
            &cancel,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            b"c1".to_vec(),
            tx,
        )
        .unwrap();

    let mut acquired = Vec::new();
    for _ in 0..3 {
        let key = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        acquired.push(key);
    }
    acquired.sort();
    assert_eq!(acquired, vec!["a", "b", "c"]);
    assert_eq!(locker.held_keys().await, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_backend_outage_is_retried() {
    let store = Arc::new(MemoryConsul::new());
    let locker = locker_on(&store);
    let cancel = CancellationToken::new();
    store.set_unavailable(true);

    let waiter = {
        let cancel = cancel.clone();
        let locker = locker.clone();
        tokio::spawn(async move { locker.lock(&cancel, "k", b"v").await })
    };
    sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    store.set_unavailable(false);
    let acquired = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert!(acquired.unwrap());
}

#[tokio::test]
async fn test_uninterruptible_wait_finishes_sleep() {
    let store = Arc::new(MemoryConsul::new());
    let holder = locker_on(&store);
    let config = ConsulLockerConfig {
        retry_timer: Duration::from_millis(400),
        acquire_wait: AcquireWait::Uninterruptible,
        ..test_config()
    };
    let waiter_locker = ConsulLocker::with_api(store.clone(), config).unwrap();

    holder
        .lock(&CancellationToken::new(), "k", b"c1")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let started = Instant::now();
    let waiter = {
        let cancel = cancel.clone();
        tokio::spawn(async move { waiter_locker.lock(&cancel, "k", b"c2").await })
    };
    sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(LockerError::Cancelled)));
    assert!(started.elapsed() >= Duration::from_millis(400));
}

// ============================================================================
// Service Registration Tests
// ============================================================================

#[tokio::test]
async fn test_heartbeat_ends_critical() {
    let store = Arc::new(MemoryConsul::new());
    let locker = Arc::new(locker_on(&store));
    let cancel = CancellationToken::new();

    let task = {
        let locker = locker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { locker.register(&cancel, registration("c1-router1")).await })
    };
    sleep(Duration::from_millis(350)).await;
    assert_eq!(
        store.check_status("service:c1-router1"),
        Some(CheckStatus::Passing)
    );
    // initial passing plus at least one heartbeat
    assert!(store.check_history("service:c1-router1").len() >= 2);

    cancel.cancel();
    task.await.unwrap().unwrap();

    let history = store.check_history("service:c1-router1");
    let last = history.last().unwrap();
    assert_eq!(last.status, CheckStatus::Critical);
    assert!(!last.output.is_empty());

    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.check_history("service:c1-router1").len(), history.len());
}

#[tokio::test]
async fn test_deregister_removes_service() {
    let store = Arc::new(MemoryConsul::new());
    let locker = Arc::new(locker_on(&store));
    let cancel = CancellationToken::new();

    let task = {
        let locker = locker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { locker.register(&cancel, registration("c1-router1")).await })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.service_ids(), vec!["c1-router1"]);

    locker.deregister("c1-router1").await.unwrap();
    timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(store.service_ids().is_empty());
    assert!(
        locker
            .get_services("gantry-collector", &[])
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_stop_cancels_heartbeats() {
    let store = Arc::new(MemoryConsul::new());
    let locker = Arc::new(locker_on(&store));

    let task = {
        let locker = locker.clone();
        tokio::spawn(async move {
            locker
                .register(&CancellationToken::new(), registration("c1-router1"))
                .await
        })
    };
    sleep(Duration::from_millis(50)).await;

    locker.stop().await.unwrap();
    timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        store.check_status("service:c1-router1"),
        Some(CheckStatus::Critical)
    );
}

#[tokio::test]
async fn test_watch_services_reports_changes() {
    let store = Arc::new(MemoryConsul::new());
    let locker = Arc::new(locker_on(&store));
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(4);

    let watcher = {
        let locker = locker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            locker
                .watch_services(&cancel, "gantry-collector", &[], tx, Duration::from_millis(50))
                .await
        })
    };

    let initial = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(initial.is_empty());

    let registration_cancel = CancellationToken::new();
    {
        let locker = locker.clone();
        let registration_cancel = registration_cancel.clone();
        tokio::spawn(async move {
            locker
                .register(&registration_cancel, registration("c1-router1"))
                .await
        });
    }

    let updated = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].id, "c1-router1");
    assert_eq!(updated[0].port, 7890);

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    registration_cancel.cancel();
}
