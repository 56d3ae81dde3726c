use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Invoked with the device id once a device's deadline passes.
pub type ExpiryCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct State {
    deadlines: HashMap<String, Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    on_expire: ExpiryCallback,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-shot liveness deadline per device, served by a single scheduler thread.
///
/// A deadline is taken out of the table before its callback runs, so a
/// cancel either removes it first and the callback never runs, or finds
/// nothing and does nothing.
pub struct AvailabilityTimers {
    timeout: Option<Duration>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AvailabilityTimers {
    /// A zero or missing timeout disables the timers entirely.
    pub fn new(timeout: Option<Duration>, on_expire: ExpiryCallback) -> Self {
        let timeout = timeout.filter(|timeout| !timeout.is_zero());
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                deadlines: HashMap::new(),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            on_expire,
        });

        let worker = timeout.and_then(|_| {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("availability".into())
                .spawn(move || run(&shared))
                .map_err(|e| warn!("Could not start availability timer thread: {e}"))
                .ok()
        });

        Self {
            timeout,
            shared,
            worker,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }

    /// (Re)arm the device's deadline. Returns `false` when timers are disabled.
    pub fn reset(&self, device_id: &str) -> bool {
        let Some(timeout) = self.timeout.filter(|_| self.is_enabled()) else {
            return false;
        };
        let mut state = self.shared.lock();
        if state
            .deadlines
            .insert(device_id.to_string(), Instant::now() + timeout)
            .is_some()
        {
            debug!("Rearmed availability timer of {device_id}");
        }
        self.shared.wakeup.notify_all();
        true
    }

    /// Disarm the device's deadline. Returns whether one was armed.
    pub fn cancel(&self, device_id: &str) -> bool {
        let removed = self.shared.lock().deadlines.remove(device_id).is_some();
        if removed {
            self.shared.wakeup.notify_all();
        }
        removed
    }

    pub fn armed(&self, device_id: &str) -> bool {
        self.shared.lock().deadlines.contains_key(device_id)
    }
}

impl Drop for AvailabilityTimers {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("availability timer thread panicked");
            }
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        let expired: Vec<String> = state
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(device_id, _)| device_id.clone())
            .collect();
        if !expired.is_empty() {
            for device_id in &expired {
                state.deadlines.remove(device_id);
            }
            drop(state);
            for device_id in &expired {
                (shared.on_expire)(device_id);
            }
            state = shared.lock();
            continue;
        }

        state = match state.deadlines.values().min().copied() {
            Some(next) => {
                shared
                    .wakeup
                    .wait_timeout(state, next.saturating_duration_since(now))
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => shared
                .wakeup
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
    }
}
