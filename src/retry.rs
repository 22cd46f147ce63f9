use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::debug;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Bounded retry: one immediate attempt, then one more per backoff step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// Schedule for unlinking a file the transfer engine may still hold open.
    pub fn delete_on_lock() -> Self {
        Self::new(vec![Duration::from_millis(100), Duration::from_millis(500)])
    }

    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    pub fn run<T, E, F>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(usize) -> Result<T, E>,
    {
        let mut result = operation(1);
        for (index, delay) in self.backoff.iter().enumerate() {
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(attempt = index + 1, error = %err, "attempt failed, backing off");
                    sleeper.sleep(*delay);
                    result = operation(index + 2);
                }
            }
        }
        result
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::delete_on_lock()
    }
}
