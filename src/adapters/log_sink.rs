//! Log-based notifier adapter.
//!
//! Implements [`Notifier`] by writing each notification through the `log`
//! facade.  A push-service adapter (ntfy, e-mail) would implement the
//! same trait and plug into the same worker.

use log::{info, warn};

use crate::app::notify::{Notification, Priority};
use crate::app::ports::Notifier;

/// Adapter that logs every [`Notification`].
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn send(&mut self, n: &Notification) -> bool {
        match n.priority {
            Priority::High | Priority::Max => {
                warn!("NOTIFY | [{:?}] {} | {} | tags={}", n.priority, n.title, n.message, n.tags.join(","));
            }
            _ => info!("NOTIFY | {} | {}", n.title, n.message),
        }
        true
    }
}
