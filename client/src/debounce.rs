use std::cell::RefCell;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Cancellable trailing-edge timer: each `schedule` replaces the pending run.
///
/// Must be used from inside a `tokio::task::LocalSet`.
pub struct Debouncer {
    delay: Duration,
    pending: RefCell<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: RefCell::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` once `delay` has passed without another call to `schedule`.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.cancel();
        let delay = self.delay;
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        *self.pending.borrow_mut() = Some(handle);
    }

    /// Drop the pending run. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.pending.borrow_mut().take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use tokio::task::LocalSet;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_collapse_into_last() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new(Duration::from_millis(150));
                let runs = Rc::new(Cell::new(0));
                let last = Rc::new(Cell::new(0));

                for i in 1..=5 {
                    let runs = Rc::clone(&runs);
                    let last = Rc::clone(&last);
                    debouncer.schedule(move || {
                        runs.set(runs.get() + 1);
                        last.set(i);
                    });
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                assert_eq!(runs.get(), 0);
                assert!(debouncer.is_pending());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(runs.get(), 1);
                assert_eq!(last.get(), 5);
                assert!(!debouncer.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_run() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new(Duration::from_millis(50));
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);
                debouncer.schedule(move || flag.set(true));

                assert!(debouncer.cancel());
                assert!(!debouncer.cancel());
                tokio::time::sleep(Duration::from_millis(200)).await;
                assert!(!ran.get());
            })
            .await;
    }
}
