use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A one-shot latch that threads can wait on.
///
/// Used for engine shutdown and for session teardown notification. Clones
/// share the same latch.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch and wake every waiter. Returns false if it was already fired.
    pub fn trigger(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut fired = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *fired {
            return false;
        }
        *fired = true;
        cvar.notify_all();
        true
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the latch fires.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut fired = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            fired = cvar.wait(fired).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the latch fires or `timeout` elapses. Returns true if fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut fired = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fired = cvar
                .wait_timeout(fired, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn trigger_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(signal.trigger());
        assert!(waiter.join().expect("waiter should finish"));
        assert!(signal.is_triggered());
    }

    #[test]
    fn trigger_is_one_shot() {
        let signal = ShutdownSignal::new();
        assert!(signal.trigger());
        assert!(!signal.trigger());
        signal.wait();
    }

    #[test]
    fn wait_timeout_expires_without_trigger() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
