//! Provider Web API bodies.
//!
//! Only the fields the bridge reads are modeled; everything else in the
//! provider's responses is ignored during deserialization.
//!
//! # Wire Format
//!
//! A track object as returned by search and the player endpoints:
//!
//! ```json
//! {
//!     "id": "4uLU6hMCjMI75M1A2tKUQC",
//!     "name": "Never Gonna Give You Up",
//!     "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
//!     "duration_ms": 213573,
//!     "preview_url": null,
//!     "artists": [{ "name": "Rick Astley" }],
//!     "album": {
//!         "name": "Whenever You Need Somebody",
//!         "images": [{ "url": "https://i.scdn.co/image/ab67", "width": 640, "height": 640 }]
//!     }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, DurationMilliSeconds};
use url::Url;

/// An artwork variant at one resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Image {
    pub url: Url,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Album {
    pub name: String,

    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub images: Vec<Image>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Track {
    /// Absent for local files.
    pub id: Option<String>,
    pub name: String,
    pub uri: String,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "duration_ms")]
    pub duration: Duration,

    pub preview_url: Option<Url>,

    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Album,
}

/// A page of results.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    pub next: Option<Url>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SearchResponse {
    pub tracks: Paging<Track>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Owner {
    pub display_name: Option<String>,
}

/// Reference to the tracks of a playlist, without the tracks themselves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TracksRef {
    pub total: u64,
}

/// A collection the user follows or owns.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub uri: String,

    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub images: Vec<Image>,

    pub owner: Owner,

    #[serde(default)]
    pub tracks: TracksRef,
}

/// A Connect device as listed by `/me/player/devices`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Device {
    /// The provider may withhold ids of restricted devices.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    pub volume_percent: Option<u8>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Devices {
    pub devices: Vec<Device>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Context {
    pub uri: String,
}

/// The state reported by `/me/player`.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PlayerState {
    pub device: Device,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "progress_ms", default)]
    pub progress: Option<Duration>,

    pub is_playing: bool,

    /// Episodes and ads do not deserialize as tracks and are treated as
    /// nothing playing.
    #[serde_as(deserialize_as = "serde_with::DefaultOnError")]
    #[serde(default)]
    pub item: Option<Track>,

    pub context: Option<Context>,
}

/// Body of `PUT /me/player/play`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Play {
    Uris { uris: Vec<String> },
    Context { context_uri: String },
}

/// Error body the provider sends with non-success statuses.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorDetails {
    pub status: u16,
    pub message: String,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_deserializes_with_millisecond_duration() {
        let track: Track = serde_json::from_str(
            r#"{
                "id": "t1",
                "name": "Warm Up",
                "uri": "spotify:track:t1",
                "duration_ms": 200000,
                "preview_url": null,
                "artists": [{ "name": "A" }, { "name": "B" }],
                "album": { "name": "Cardio", "images": null },
                "popularity": 42
            }"#,
        )
        .unwrap();

        assert_eq!(track.duration, Duration::from_millis(200_000));
        assert_eq!(track.artists.len(), 2);
        assert!(track.album.images.is_empty());
    }

    #[test]
    fn player_state_tolerates_episodes() {
        let state: PlayerState = serde_json::from_str(
            r#"{
                "device": { "id": "d1", "name": "Gym", "type": "Computer", "volume_percent": 50 },
                "progress_ms": 1000,
                "is_playing": true,
                "item": { "type": "episode", "name": "Podcast" },
                "context": null
            }"#,
        )
        .unwrap();

        assert_eq!(state.item, None);
        assert_eq!(state.progress, Some(Duration::from_secs(1)));
    }

    #[test]
    fn play_bodies_serialize_untagged() {
        let uris = serde_json::to_value(Play::Uris {
            uris: vec!["spotify:track:t1".to_owned()],
        })
        .unwrap();
        assert_eq!(uris, serde_json::json!({ "uris": ["spotify:track:t1"] }));

        let context = serde_json::to_value(Play::Context {
            context_uri: "spotify:playlist:p1".to_owned(),
        })
        .unwrap();
        assert_eq!(
            context,
            serde_json::json!({ "context_uri": "spotify:playlist:p1" })
        );
    }
}
