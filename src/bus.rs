//! Subscriber registry for playback snapshots.
//!
//! Subscribers are shared callbacks. Registration order is notification
//! order, registering the same callback twice delivers every snapshot twice,
//! and unsubscribing compares callbacks by pointer identity.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use playsync::bus::{Bus, Subscriber};
//!
//! let bus = Bus::new();
//! let subscriber: Subscriber = Arc::new(|snapshot| println!("{snapshot:?}"));
//! bus.subscribe(Arc::clone(&subscriber));
//! bus.unsubscribe(&subscriber);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::mirror::Snapshot;

/// A callback that receives every snapshot.
pub type Subscriber = Arc<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Default)]
pub struct Bus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.lock().push(subscriber);
    }

    /// Removes every registration of `subscriber`. Unknown subscribers are
    /// ignored.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        self.lock()
            .retain(|registered| !Arc::ptr_eq(registered, subscriber));
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Calls every subscriber with `snapshot`, in registration order.
    ///
    /// The registry is not locked while callbacks run, so a callback may
    /// subscribe or unsubscribe; such changes apply from the next snapshot.
    pub fn notify(&self, snapshot: &Snapshot) {
        let subscribers = self.lock().clone();
        for subscriber in subscribers {
            subscriber(snapshot);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("subscribers", &self.len())
            .finish()
    }
}
