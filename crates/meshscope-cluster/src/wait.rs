//! Polling helpers

use std::future::Future;
use std::time::Duration;

use meshscope_core::ReplicaStatus;
use tokio::time::{Instant, sleep};

/// Poll `check` every `interval` until it returns true or `timeout` elapses.
///
/// The check always runs at least once, so a zero timeout still reports
/// already-ready workloads.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Ready once every desired replica is ready and at least one is desired
pub fn replicas_ready(replicas: Option<ReplicaStatus>) -> bool {
    replicas.is_some_and(|r| r.desired > 0 && r.ready >= r.desired)
}
