//! Background tasks cancelled on drop. `stop` also waits for the body to return.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::AppError;

pub struct SupervisedTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SupervisedTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(body(cancel.clone()));

        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    // A failed tick is logged and the loop carries on.
    pub fn periodic<F, Fut>(name: &'static str, period: Duration, immediate: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        Self::spawn(name, move |cancel| async move {
            let first = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut interval = interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = tick() => {
                        if let Err(err) = result {
                            warn!(task = name, error = %err, "periodic tick failed");
                        }
                    }
                }
            }

            debug!(task = name, "periodic task stopped");
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!(task = self.name, "supervised task panicked");
                }
            }
        }
    }
}

impl Drop for SupervisedTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::SupervisedTask;
    use crate::error::AppError;

    #[tokio::test(start_paused = true)]
    async fn periodic_task_keeps_running_after_failed_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = SupervisedTask::periodic("flaky", Duration::from_secs(1), true, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(AppError::Unavailable("first tick fails".to_string()))
                } else {
                    Ok(())
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        task.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_task_never_ticks_again() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = SupervisedTask::periodic("counter", Duration::from_secs(1), false, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        task.stop().await;
        let seen = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(seen, 2);
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn dropping_task_cancels_it() {
        let task = SupervisedTask::spawn("idle", |cancel| async move {
            cancel.cancelled().await;
        });
        let token = task.cancel.clone();

        drop(task);
        assert!(token.is_cancelled());
    }
}
