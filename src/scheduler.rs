//! Scheduler / `waitUntil` abstraction: lets request-scoped code enqueue
//! background work (index updates, cache writes, revalidation) without
//! blocking the response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Implemented by anything that can accept fire-and-forget background
/// work tied to the lifetime of a request (in the vein of Cloudflare
/// Workers' `ctx.waitUntil`).
pub trait BackgroundScheduler: Send + Sync {
    fn wait_until(&self, fut: BoxFuture);
}

/// `tokio::spawn`-backed scheduler bounded by a semaphore, so a burst of
/// background work (variant-cache writes, index maintenance) cannot
/// unbound the process's task count.
pub struct Scheduler {
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn spawn(&self, fut: BoxFuture) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            fut.await;
        });
    }
}

impl BackgroundScheduler for Scheduler {
    fn wait_until(&self, fut: BoxFuture) {
        self.spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn scheduled_work_eventually_runs() {
        let scheduler = Scheduler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            scheduler.wait_until(Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
