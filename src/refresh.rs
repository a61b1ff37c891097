use std::future::Future;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshCommand {
    RefreshNow,
    Stop,
}

/// Owner handle of a running refresh loop. Dropping it cancels the loop.
pub struct RefreshHandle {
    cmd_tx: Sender<RefreshCommand>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Runs `tick` immediately and then every `period` until stopped.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Index refresh armed, every {}s", period.as_secs());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        debug!("Scheduled index refresh");
                        tick().await;
                    }
                    command = cmd_rx.recv() => match command {
                        Some(RefreshCommand::RefreshNow) => {
                            tick().await;
                            interval.reset();
                        }
                        Some(RefreshCommand::Stop) | None => {
                            info!("Index refresh disarmed");
                            return;
                        }
                    },
                }
            }
        });

        Self { cmd_tx, task }
    }

    pub fn refresh_now(&self) {
        let _ = self.cmd_tx.try_send(RefreshCommand::RefreshNow);
    }

    pub fn stop(self) {
        let _ = self.cmd_tx.try_send(RefreshCommand::Stop);
        // Drop aborts whatever tick is still in flight.
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Runs `job` once after `delay`. Abort the handle to cancel.
pub fn spawn_deferred<Fut>(delay: Duration, job: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        job.await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_ticks_immediately_and_periodically() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = RefreshHandle::spawn(Duration::from_millis(30), counting(&counter));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);
        handle.stop();
    }

    #[tokio::test]
    async fn test_refresh_now_runs_out_of_band() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = RefreshHandle::spawn(Duration::from_secs(3600), counting(&counter));
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.refresh_now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = RefreshHandle::spawn(Duration::from_millis(10), counting(&counter));
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(handle);

        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_deferred_job_can_be_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let job = spawn_deferred(Duration::from_millis(30), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        job.abort();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let c = counter.clone();
        spawn_deferred(Duration::from_millis(5), async move {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
