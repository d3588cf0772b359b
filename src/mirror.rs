//! The local copy of the device's playback state.
//!
//! The [`Mirror`] owns the only writable [`PlaybackState`] of a session.
//! It changes in response to [`PlayerEvent`]s and to optimistic volume
//! writes, and every change is broadcast on its [`Bus`] as an immutable
//! [`Snapshot`]. Events that carry no state (errors) change nothing and
//! notify nobody.
//!
//! Changes are delivered in the order they were made, so the last snapshot
//! a subscriber saw is always the current one. Subscribers may read the
//! mirror but must not change it from inside their callback.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{bus::Bus, events::PlayerEvent, track::Track};

/// An immutable view of the playback state at one point in time.
pub type Snapshot = Arc<PlaybackState>;

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    pub track: Option<Track>,
    /// URI of the collection being played from.
    pub collection: Option<String>,
    /// Between 0.0 and 1.0.
    pub volume: f32,
    pub position: Duration,
    pub duration: Duration,
    pub connected: bool,
    pub device_id: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playing: false,
            track: None,
            collection: None,
            volume: 0.5,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            connected: false,
            device_id: None,
        }
    }
}

#[derive(Debug)]
pub struct Mirror {
    state: Mutex<PlaybackState>,
    /// Held from mutation until every subscriber has been called.
    delivery: Mutex<()>,
    bus: Bus,
}

impl Mirror {
    #[must_use]
    pub fn new(initial_volume: f32) -> Self {
        Self {
            state: Mutex::new(PlaybackState {
                volume: initial_volume.clamp(0.0, 1.0),
                ..PlaybackState::default()
            }),
            delivery: Mutex::new(()),
            bus: Bus::new(),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::new(self.lock().clone())
    }

    /// Applies a device event. Returns whether the state changed.
    pub fn apply(&self, event: &PlayerEvent) -> bool {
        match event {
            PlayerEvent::Ready { device_id } => {
                debug!("device {device_id} ready");
                self.update(|state| {
                    state.connected = true;
                    state.device_id = Some(device_id.clone());
                    true
                });
            }

            PlayerEvent::NotReady { device_id } => {
                debug!("device {device_id} not ready");
                self.update(|state| {
                    state.connected = false;
                    state.device_id = None;
                    true
                });
            }

            PlayerEvent::StateChanged(Some(player)) => {
                self.update(|state| {
                    state.track.clone_from(&player.track);
                    state.collection.clone_from(&player.context);
                    state.position = player.position;
                    state.duration = player.duration;
                    state.playing = !player.paused;
                    true
                });
            }

            PlayerEvent::StateChanged(None) => {
                self.update(|state| {
                    state.track = None;
                    state.collection = None;
                    state.position = Duration::ZERO;
                    state.duration = Duration::ZERO;
                    state.playing = false;
                    true
                });
            }

            PlayerEvent::InitializationError(_)
            | PlayerEvent::AuthenticationError(_)
            | PlayerEvent::AccountError(_)
            | PlayerEvent::PlaybackError(_) => return false,
        }

        true
    }

    /// Writes the volume ahead of the device's confirmation.
    pub fn set_volume(&self, volume: f32) {
        self.update(|state| {
            state.volume = volume.clamp(0.0, 1.0);
            true
        });
    }

    /// Marks the device as gone, for instance after a disconnect.
    ///
    /// Notifies only if the device was not already marked gone.
    pub fn disconnect(&self) {
        self.update(|state| {
            let changed = state.connected || state.device_id.is_some() || state.playing;
            state.connected = false;
            state.device_id = None;
            state.playing = false;
            changed
        });
    }

    /// Mutates the state with `f` and, if `f` reports a change, notifies
    /// subscribers once.
    ///
    /// The state lock is released before subscribers run, so they can read
    /// the mirror. The delivery lock keeps concurrent updates from
    /// overtaking each other on their way to the subscribers.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PlaybackState) -> bool,
    {
        let _delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let mut state = self.lock();
            if !f(&mut state) {
                return;
            }
            Arc::new(state.clone())
        };

        self.bus.notify(&snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{bus::Subscriber, events::PlayerState};

    fn track() -> Track {
        Track {
            id: "t1".to_owned(),
            name: "Warm Up".to_owned(),
            artists: vec!["A".to_owned()],
            album: "Cardio".to_owned(),
            images: Vec::new(),
            duration: Duration::from_millis(200_000),
            uri: "spotify:track:t1".to_owned(),
            preview_url: None,
        }
    }

    fn recorder(mirror: &Mirror) -> Arc<Mutex<Vec<Snapshot>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber: Subscriber = {
            let seen = Arc::clone(&seen);
            Arc::new(move |snapshot| seen.lock().unwrap().push(Arc::clone(snapshot)))
        };
        mirror.bus().subscribe(subscriber);
        seen
    }

    #[test]
    fn state_change_replaces_playback_fields() {
        let mirror = Mirror::new(0.5);
        let seen = recorder(&mirror);

        let changed = mirror.apply(&PlayerEvent::StateChanged(Some(PlayerState {
            track: Some(track()),
            context: Some("spotify:playlist:p1".to_owned()),
            position: Duration::from_millis(5000),
            duration: Duration::from_millis(200_000),
            paused: false,
        })));
        assert!(changed);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let snapshot = &seen[0];
        assert!(snapshot.playing);
        assert_eq!(snapshot.position, Duration::from_millis(5000));
        assert_eq!(snapshot.duration, Duration::from_millis(200_000));
        assert_eq!(snapshot.track.as_ref().map(|t| t.id.as_str()), Some("t1"));
        assert_eq!(**snapshot, *mirror.snapshot());
    }

    #[test]
    fn ready_and_not_ready_toggle_connection() {
        let mirror = Mirror::new(0.5);
        mirror.apply(&PlayerEvent::Ready {
            device_id: "d1".to_owned(),
        });
        assert!(mirror.snapshot().connected);
        assert_eq!(mirror.snapshot().device_id.as_deref(), Some("d1"));

        mirror.apply(&PlayerEvent::NotReady {
            device_id: "d1".to_owned(),
        });
        assert!(!mirror.snapshot().connected);
        assert_eq!(mirror.snapshot().device_id, None);
    }

    #[test]
    fn errors_do_not_notify() {
        let mirror = Mirror::new(0.5);
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            mirror.bus().subscribe(Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(!mirror.apply(&PlayerEvent::AuthenticationError("expired".to_owned())));
        assert!(!mirror.apply(&PlayerEvent::PlaybackError("skip failed".to_owned())));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn volume_is_clamped() {
        let mirror = Mirror::new(2.0);
        assert!((mirror.snapshot().volume - 1.0).abs() < f32::EPSILON);

        mirror.set_volume(-1.0);
        assert!(mirror.snapshot().volume.abs() < f32::EPSILON);
    }

    #[test]
    fn disconnect_notifies_only_when_connected() {
        let mirror = Mirror::new(0.5);
        let seen = recorder(&mirror);

        mirror.disconnect();
        assert!(seen.lock().unwrap().is_empty());

        mirror.apply(&PlayerEvent::Ready {
            device_id: "d1".to_owned(),
        });
        mirror.disconnect();
        mirror.disconnect();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[1].connected);
    }

    #[test]
    fn concurrent_changes_arrive_in_order() {
        let mirror = Arc::new(Mirror::new(0.5));
        let seen = recorder(&mirror);

        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let mirror = Arc::clone(&mirror);
                std::thread::spawn(move || {
                    for step in 0..250_u16 {
                        if writer % 2 == 0 {
                            mirror.set_volume(f32::from(step) / 250.0);
                        } else {
                            mirror.apply(&PlayerEvent::StateChanged(Some(PlayerState {
                                track: None,
                                context: None,
                                position: Duration::from_millis(u64::from(step)),
                                duration: Duration::from_secs(200),
                                paused: step % 2 == 0,
                            })));
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1000);
        assert_eq!(seen.last(), Some(&mirror.snapshot()));
    }

    #[test]
    fn snapshots_are_frozen() {
        let mirror = Mirror::new(0.5);
        let before = mirror.snapshot();
        mirror.set_volume(0.8);
        assert!((before.volume - 0.5).abs() < f32::EPSILON);
    }
}
