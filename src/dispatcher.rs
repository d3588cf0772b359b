//! Playback commands.
//!
//! Transport controls (toggle, skip, seek, volume) go to the device
//! directly and are refused while it is not connected. Starting playback of
//! a specific track or collection, searching and listing collections go
//! through the Web API.
//!
//! Commands report whether they were sent, not whether they took effect:
//! the device confirms by publishing new state. Failed commands never touch
//! the [`Mirror`].

use std::{sync::Arc, time::Duration};

use crate::{
    api::WebApi,
    credential::{Credential, CredentialStore},
    device::{DeviceBridge, Player},
    error::{Error, Result},
    mirror::Mirror,
    protocol::web_api::{Play, Playlist},
    track::Track,
};

pub struct Dispatcher {
    mirror: Arc<Mirror>,
    device: Arc<DeviceBridge>,
    api: WebApi,
    store: Arc<CredentialStore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        mirror: Arc<Mirror>,
        device: Arc<DeviceBridge>,
        api: WebApi,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            mirror,
            device,
            api,
            store,
        }
    }

    /// The player, if the mirror says it is connected.
    fn connected_player(&self, command: &str) -> Option<Arc<dyn Player>> {
        if !self.mirror.snapshot().connected {
            debug!("{command} refused: device not connected");
            return None;
        }

        let player = self.device.player();
        if player.is_none() {
            debug!("{command} refused: no player");
        }
        player
    }

    fn sent(command: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("{command} failed: {e}");
                false
            }
        }
    }

    pub async fn toggle_play(&self) -> bool {
        let Some(player) = self.connected_player("toggle play") else {
            return false;
        };
        Self::sent("toggle play", player.toggle_play().await)
    }

    pub async fn next_track(&self) -> bool {
        let Some(player) = self.connected_player("next track") else {
            return false;
        };
        Self::sent("next track", player.next_track().await)
    }

    pub async fn previous_track(&self) -> bool {
        let Some(player) = self.connected_player("previous track") else {
            return false;
        };
        Self::sent("previous track", player.previous_track().await)
    }

    pub async fn seek(&self, position: Duration) -> bool {
        let Some(player) = self.connected_player("seek") else {
            return false;
        };
        Self::sent("seek", player.seek(position).await)
    }

    /// Sets the volume, clamped to between 0.0 and 1.0.
    ///
    /// The mirror takes the new volume right away, before the device
    /// confirms it.
    pub async fn set_volume(&self, volume: f32) -> bool {
        let Some(player) = self.connected_player("set volume") else {
            return false;
        };

        let volume = volume.clamp(0.0, 1.0);
        self.mirror.set_volume(volume);
        Self::sent("set volume", player.set_volume(volume).await)
    }

    /// The device id and credential needed to start playback.
    fn playback_target(&self, command: &str) -> Option<(String, Credential)> {
        let Some(device_id) = self.mirror.snapshot().device_id.clone() else {
            debug!("{command} refused: no device id");
            return None;
        };
        let Some(credential) = self.store.get() else {
            debug!("{command} refused: not authenticated");
            return None;
        };
        Some((device_id, credential))
    }

    /// Plays `uris` on the device, in order.
    pub async fn play_track<I, S>(&self, uris: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        if uris.is_empty() {
            debug!("play track refused: nothing to play");
            return false;
        }

        let Some((device_id, credential)) = self.playback_target("play track") else {
            return false;
        };
        let body = Play::Uris { uris };
        Self::sent(
            "play track",
            self.api.play(&device_id, &body, &credential).await,
        )
    }

    /// Plays a collection (playlist or album) on the device.
    pub async fn play_collection(&self, uri: impl Into<String>) -> bool {
        let Some((device_id, credential)) = self.playback_target("play collection") else {
            return false;
        };
        let body = Play::Context {
            context_uri: uri.into(),
        };
        Self::sent(
            "play collection",
            self.api.play(&device_id, &body, &credential).await,
        )
    }

    fn credential(&self) -> Result<Credential> {
        self.store
            .get()
            .ok_or_else(|| Error::unauthenticated("not authenticated"))
    }

    /// Searches the catalog for tracks.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` without a credential, or the Web API error.
    pub async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let credential = self.credential()?;
        self.api.search_tracks(query, &credential).await
    }

    /// Lists the user's collections.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` without a credential, or the Web API error.
    pub async fn playlists(&self) -> Result<Vec<Playlist>> {
        let credential = self.credential()?;
        self.api.playlists(&credential).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
