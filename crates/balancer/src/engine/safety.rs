//! Safety gate — default-to-deny checks in front of every execution.
//!
//! Every transfer must pass through [`SafetyGate`] before the execution
//! engine is invoked. On any blocked condition the gate returns a reasoned
//! error (fail-closed, not fail-open); callers never interpret a boolean.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::constants::SECONDS_PER_DAY;
use crate::errors::BalancerError;

pub struct SafetyGate {
    dry_run: bool,
    global_pause: AtomicBool,
    max_transfers_per_24h: u32,
    /// Timestamps of recent executions for the rolling 24 h cap.
    execution_times: Mutex<VecDeque<Instant>>,
}

impl SafetyGate {
    pub fn new(dry_run: bool, max_transfers_per_24h: u32) -> Self {
        Self {
            dry_run,
            global_pause: AtomicBool::new(false),
            max_transfers_per_24h,
            execution_times: Mutex::new(VecDeque::new()),
        }
    }

    /// Check whether a transfer may execute right now. Order: pause,
    /// dry-run, rolling rate limit. A poisoned lock blocks like any other
    /// failed check — an internal error must never open the gate.
    pub fn can_execute(&self) -> Result<(), BalancerError> {
        if self.is_paused() {
            return Err(BalancerError::SafetyBlocked {
                reason: "global pause is active".into(),
            });
        }

        if self.dry_run {
            return Err(BalancerError::SafetyBlocked {
                reason: "dry-run mode is active".into(),
            });
        }

        let mut times = self.lock_execution_times()?;
        let horizon = Duration::from_secs(SECONDS_PER_DAY);
        while times
            .front()
            .is_some_and(|t| t.elapsed() > horizon)
        {
            times.pop_front();
        }
        if times.len() as u32 >= self.max_transfers_per_24h {
            return Err(BalancerError::SafetyBlocked {
                reason: format!(
                    "24h transfer cap reached ({})",
                    self.max_transfers_per_24h
                ),
            });
        }

        Ok(())
    }

    /// Record an execution against the rolling window. Call after the engine
    /// accepts the signal, not before. Fails closed when the window cannot
    /// be updated — an uncounted transfer would undermine the cap.
    pub fn record_execution(&self) -> Result<(), BalancerError> {
        self.lock_execution_times()?.push_back(Instant::now());
        Ok(())
    }

    fn lock_execution_times(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, VecDeque<Instant>>, BalancerError> {
        self.execution_times
            .lock()
            .map_err(|_| BalancerError::SafetyBlocked {
                reason: "safety gate lock poisoned".into(),
            })
    }

    pub fn pause(&self) {
        warn!("safety gate paused — all executions blocked");
        self.global_pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.global_pause.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.global_pause.load(Ordering::SeqCst)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
