//! Outbound operator notifications.
//!
//! Loops build a [`Notification`] at each defined transition point and
//! hand it to a [`NotificationDispatcher`].  The dispatcher only enqueues
//! (`try_send`, never blocking); a [`NotificationWorker`] on its own
//! thread delivers to the [`Notifier`] adapter.  A slow push service can
//! therefore never stall the control loop or the watchdog.
//!
//! ```text
//! ┌──────────────┐  Notification  ┌────────────────────┐  send()  ┌──────────┐
//! │ sensor loop  │──try_send────▶│ bounded channel     │────────▶│ Notifier │
//! │ runner       │               │ (NotificationWorker)│          └──────────┘
//! │ watchdog     │               └────────────────────┘
//! └──────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::ports::Notifier;
use crate::sync::CancelToken;

/// Queue depth between producers and the delivery worker.
const QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Min,
    Low,
    Default,
    High,
    Max,
}

/// A single operator notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
        tags: &[&str],
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority,
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    // ── Builders, one per transition point ────────────────────

    pub fn system_start() -> Self {
        Self::new(
            "Kiln controller started",
            "Control system online and monitoring.",
            Priority::High,
            &["rocket"],
        )
    }

    pub fn program_start(name: &str) -> Self {
        Self::new(
            "Firing started",
            format!("Program: {name}"),
            Priority::High,
            &["fire"],
        )
    }

    pub fn program_complete(name: &str, duration_minutes: f64) -> Self {
        let hours = (duration_minutes / 60.0).floor();
        let minutes = duration_minutes - hours * 60.0;
        Self::new(
            "Firing complete",
            format!("Program: {name}\nDuration: {hours:.0}h {minutes:.0}m"),
            Priority::High,
            &["white_check_mark", "tada"],
        )
    }

    pub fn program_stopped(name: &str) -> Self {
        Self::new(
            "Firing stopped",
            format!("Program {name} stopped by operator."),
            Priority::High,
            &["pause_button"],
        )
    }

    pub fn ramp_complete(ramp: usize, total: usize, target: f64) -> Self {
        Self::new(
            format!("Ramp {ramp}/{total} complete"),
            format!("Target {target:.0}\u{00b0}C reached."),
            Priority::High,
            &["chart_with_upwards_trend"],
        )
    }

    pub fn hold_start(temperature: f64, minutes: f64) -> Self {
        Self::new(
            "Hold started",
            format!("Holding {temperature:.0}\u{00b0}C for {minutes:.0} minutes."),
            Priority::High,
            &["hourglass"],
        )
    }

    pub fn cooling_start(temperature: f64) -> Self {
        Self::new(
            "Cooling started",
            format!("Cooling from {temperature:.0}\u{00b0}C."),
            Priority::High,
            &["snowflake"],
        )
    }

    pub fn over_temp(temperature: f64) -> Self {
        Self::new(
            "EMERGENCY: over-temperature",
            format!("Temperature {temperature:.1}\u{00b0}C above the safety ceiling. Valve closed."),
            Priority::Max,
            &["rotating_light", "fire"],
        )
    }

    pub fn sensor_error() -> Self {
        Self::new(
            "Sensor error",
            "Thermocouple disconnected or faulty. Check the kiln.",
            Priority::High,
            &["x", "warning"],
        )
    }

    pub fn sensor_reconnect(temperature: f64) -> Self {
        Self::new(
            "Sensor reconnected",
            format!("Current temperature: {temperature:.1}\u{00b0}C"),
            Priority::High,
            &["white_check_mark"],
        )
    }

    pub fn fast_cooling(rate: f64) -> Self {
        Self::new(
            "Cooling too fast",
            format!("Cooling rate {rate:.0}\u{00b0}C/h. Thermal shock risk."),
            Priority::High,
            &["warning", "snowflake"],
        )
    }

    pub fn autotune_complete(kp: f64, ki: f64, kd: f64) -> Self {
        Self::new(
            "Autotune complete",
            format!("New base gains: Kp={kp:.4}, Ki={ki:.6}, Kd={kd:.4}"),
            Priority::High,
            &["white_check_mark", "gear"],
        )
    }

    pub fn emergency_stop(reason: &str) -> Self {
        Self::new(
            "EMERGENCY STOP",
            format!("Reason: {reason}\nValve closed. Manual reset required."),
            Priority::Max,
            &["rotating_light"],
        )
    }

    pub fn watchdog_emergency(reason: &str, count: u32) -> Self {
        Self::new(
            "WATCHDOG EMERGENCY",
            format!(
                "The watchdog shut off the gas.\nReason: {reason}\nTrigger #{count}\nCheck the kiln immediately."
            ),
            Priority::Max,
            &["rotating_light", "dog"],
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatcher / worker
// ───────────────────────────────────────────────────────────────

type Queue = Channel<CriticalSectionRawMutex, Notification, QUEUE_DEPTH>;

/// Cheap, clonable producer handle.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: Arc<Queue>,
    dropped: Arc<AtomicU32>,
}

/// Consumer side: delivers queued notifications to a [`Notifier`].
pub struct NotificationWorker {
    queue: Arc<Queue>,
    notifier: Box<dyn Notifier>,
    delivered: u32,
    failed: u32,
}

impl NotificationDispatcher {
    pub fn new(notifier: Box<dyn Notifier>) -> (Self, NotificationWorker) {
        let queue = Arc::new(Channel::new());
        (
            Self {
                queue: queue.clone(),
                dropped: Arc::new(AtomicU32::new(0)),
            },
            NotificationWorker {
                queue,
                notifier,
                delivered: 0,
                failed: 0,
            },
        )
    }

    /// Enqueue without blocking.  Returns `false` (and counts a drop)
    /// when the queue is full.
    pub fn send(&self, notification: Notification) -> bool {
        let title = notification.title.clone();
        if self.queue.try_send(notification).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("NOTIFY | queue full, dropped \"{title}\"");
            return false;
        }
        true
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NotificationWorker {
    /// Deliver everything currently queued.  Returns how many were sent.
    pub fn flush(&mut self) -> usize {
        let mut count = 0;
        while let Ok(n) = self.queue.try_receive() {
            self.deliver(&n);
            count += 1;
        }
        count
    }

    fn deliver(&mut self, n: &Notification) {
        if self.notifier.send(n) {
            self.delivered += 1;
            debug!("NOTIFY | delivered \"{}\"", n.title);
        } else {
            self.failed += 1;
            warn!("NOTIFY | delivery failed for \"{}\"", n.title);
        }
    }

    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    /// Run on a dedicated thread until `cancel` fires, then drain the queue.
    pub fn spawn(mut self, cancel: CancelToken) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("notify".into())
            .spawn(move || {
                loop {
                    let next = future::block_on(future::or(
                        async { Some(self.queue.receive().await) },
                        async {
                            cancel.cancelled().await;
                            None
                        },
                    ));
                    match next {
                        Some(n) => self.deliver(&n),
                        None => break,
                    }
                }
                self.flush();
            })
    }
}
