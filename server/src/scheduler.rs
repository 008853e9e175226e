//! Single-shot timers driven by the host tick.
//!
//! Tasks are plain values that come back out of [`Scheduler::advance`] once
//! their delay has elapsed on the simulation clock. Nothing sleeps: the game
//! loop keeps ticking and collects due tasks between other work. Each timer
//! carries a [`CancelToken`] so whoever owns the handle can abandon it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`Scheduler::schedule`].
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancelToken,
}

impl TimerHandle {
    /// Abandons the timer; its task will never be returned.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[cfg(test)]
    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    due: BinaryHeap<Reverse<(Duration, u64)>>,
    tasks: HashMap<u64, (T, CancelToken)>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            due: BinaryHeap::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, after: Duration, task: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        let token = CancelToken::new();
        self.due.push(Reverse((self.now + after, id)));
        self.tasks.insert(id, (task, token.clone()));

        TimerHandle { token }
    }

    /// Moves the clock forward and returns every task that came due, oldest
    /// deadline first. Cancelled timers are discarded silently.
    pub fn advance(&mut self, dt: Duration) -> Vec<T> {
        self.now += dt;

        let mut fired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.due.peek().copied() {
            if deadline > self.now {
                break;
            }
            self.due.pop();

            if let Some((task, token)) = self.tasks.remove(&id) {
                if !token.is_cancelled() {
                    fired.push(task);
                }
            }
        }
        fired
    }

    /// Number of timers that are still armed.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.tasks
            .values()
            .filter(|(_, token)| !token.is_cancelled())
            .count()
    }
}
