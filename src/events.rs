//! Events published by a playback device.
//!
//! Vendor callbacks are turned into [`PlayerEvent`]s on a channel, so that
//! the rest of the crate never sees the vendor's callback shapes. The
//! events fall into two categories:
//!
//! Lifecycle:
//! * [`Ready`](PlayerEvent::Ready) - the device has an id and accepts commands
//! * [`NotReady`](PlayerEvent::NotReady) - the device went away
//!
//! Playback:
//! * [`StateChanged`](PlayerEvent::StateChanged) - the authoritative playback state
//!
//! Everything else reports a failure.

use std::time::Duration;

use crate::track::Track;

/// Playback state as reported by the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerState {
    pub track: Option<Track>,
    /// URI of the collection being played from, if any.
    pub context: Option<String>,
    pub position: Duration,
    pub duration: Duration,
    pub paused: bool,
}

impl PlayerState {
    /// Whether `self` is what `previous` becomes after `elapsed` of
    /// undisturbed playback.
    ///
    /// Positions within `tolerance` of the expected position count as
    /// undisturbed, which absorbs polling jitter without hiding seeks.
    #[must_use]
    pub fn continues(&self, previous: &Self, elapsed: Duration, tolerance: Duration) -> bool {
        if self.track != previous.track
            || self.context != previous.context
            || self.duration != previous.duration
            || self.paused != previous.paused
        {
            return false;
        }

        let expected = if self.paused {
            previous.position
        } else {
            (previous.position + elapsed).min(self.duration)
        };

        self.position.abs_diff(expected) <= tolerance
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The device is connected and addressable by `device_id`.
    Ready { device_id: String },

    /// The device with `device_id` went offline.
    NotReady { device_id: String },

    /// The device reported new state. `None` means nothing is playing on
    /// this device, for instance because playback moved elsewhere.
    StateChanged(Option<PlayerState>),

    /// The device could not be initialized.
    InitializationError(String),

    /// The credential was rejected.
    AuthenticationError(String),

    /// The account cannot use the device, typically for lack of a premium
    /// subscription.
    AccountError(String),

    /// A playback command failed on the device.
    PlaybackError(String),
}

impl PlayerEvent {
    /// Whether this event decides the outcome of an initialization.
    #[must_use]
    pub fn is_decisive(&self) -> bool {
        matches!(
            self,
            Self::Ready { .. }
                | Self::InitializationError(_)
                | Self::AuthenticationError(_)
                | Self::AccountError(_)
        )
    }
}
