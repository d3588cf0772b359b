use std::{fmt, time::Duration};

use url::Url;

use crate::protocol::web_api::{self, Image};

/// An immutable track as shown to observers.
///
/// Tracks are replaced wholesale whenever the device reports a different
/// one; they are never modified in place.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Track {
    /// Empty for local files, which the provider does not identify.
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    /// Artwork in the resolutions the provider offers, largest first.
    pub images: Vec<Image>,
    pub duration: Duration,
    pub uri: String,
    pub preview_url: Option<Url>,
}

impl From<web_api::Track> for Track {
    fn from(track: web_api::Track) -> Self {
        let mut images = track.album.images;
        images.sort_by_key(|image| std::cmp::Reverse(image.width.unwrap_or(0)));

        Self {
            id: track.id.unwrap_or_default(),
            name: track.name,
            artists: track.artists.into_iter().map(|artist| artist.name).collect(),
            album: track.album.name,
            images,
            duration: track.duration,
            uri: track.uri,
            preview_url: track.preview_url,
        }
    }
}

/// Formats as "Artist, Artist - Name".
impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.artists.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} - {}", self.artists.join(", "), self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32) -> Image {
        Image {
            url: Url::parse(&format!("https://img.example/{width}")).unwrap(),
            width: Some(width),
            height: Some(width),
        }
    }

    fn track() -> Track {
        Track {
            id: "t1".to_owned(),
            name: "Warm Up".to_owned(),
            artists: vec!["A".to_owned(), "B".to_owned()],
            album: "Cardio".to_owned(),
            images: vec![image(640), image(300), image(64)],
            duration: Duration::from_secs(200),
            uri: "spotify:track:t1".to_owned(),
            preview_url: None,
        }
    }

    #[test]
    fn display_lists_artists() {
        assert_eq!(track().to_string(), "A, B - Warm Up");
    }
}
