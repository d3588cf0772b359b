//! Client for the provider Web API.
//!
//! Every call is authorized with the caller's [`Credential`] and goes
//! through the rate-limited [`http::Client`](crate::http::Client).
//! Non-success statuses become errors whose [`ErrorKind`](crate::error::ErrorKind)
//! follows the status code. Nothing is retried.

use std::time::Duration;

use reqwest::{Method, StatusCode, Url};

use crate::{
    config::Config,
    credential::Credential,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        web_api::{self, Devices, ErrorResponse, Paging, Play, Playlist, SearchResponse},
    },
    track::Track,
};

pub struct WebApi {
    http_client: HttpClient,
    config: Config,
}

impl WebApi {
    /// Number of search results asked for.
    pub const SEARCH_LIMIT: u8 = 20;

    /// Number of playlists asked for.
    pub const PLAYLIST_LIMIT: u8 = 50;

    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            config: config.clone(),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.config.api_endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Sends `request` and turns non-success statuses into errors.
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let method = request.method().clone();
        let path = request.url().path().to_owned();

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // The provider usually explains itself in a JSON error body.
        let body = response.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(ErrorResponse { error }) => match error.reason {
                Some(reason) => format!("{} ({reason})", error.message),
                None => error.message,
            },
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => body,
        };

        Err(Error::from_status(
            status,
            format!("{method} {path} returned {status}: {reason}"),
        ))
    }

    async fn get<T>(&self, url: Url, credential: &Credential, origin: &str) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de> + std::fmt::Debug,
    {
        let request = self.http_client.get(url, credential)?;
        let body = self.send(request).await?.text().await?;
        protocol::json(&body, origin)
    }

    async fn command(
        &self,
        method: Method,
        url: Url,
        credential: &Credential,
        body: Option<&Play>,
    ) -> Result<()> {
        let request = match body {
            Some(body) => self.http_client.json(method, url, credential, body)?,
            None => self
                .http_client
                .request(method, url, credential, reqwest::Body::from(""))?,
        };
        self.send(request).await.map(|_| ())
    }

    /// Starts playback of `body` on `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn play(&self, device_id: &str, body: &Play, credential: &Credential) -> Result<()> {
        let url = self.endpoint("me/player/play", &[("device_id", device_id)])?;
        self.command(Method::PUT, url, credential, Some(body)).await
    }

    /// Resumes whatever `device_id` was playing.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn resume(&self, device_id: &str, credential: &Credential) -> Result<()> {
        let url = self.endpoint("me/player/play", &[("device_id", device_id)])?;
        self.command(Method::PUT, url, credential, None).await
    }

    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn pause(&self, device_id: &str, credential: &Credential) -> Result<()> {
        let url = self.endpoint("me/player/pause", &[("device_id", device_id)])?;
        self.command(Method::PUT, url, credential, None).await
    }

    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn next(&self, device_id: &str, credential: &Credential) -> Result<()> {
        let url = self.endpoint("me/player/next", &[("device_id", device_id)])?;
        self.command(Method::POST, url, credential, None).await
    }

    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn previous(&self, device_id: &str, credential: &Credential) -> Result<()> {
        let url = self.endpoint("me/player/previous", &[("device_id", device_id)])?;
        self.command(Method::POST, url, credential, None).await
    }

    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn seek(
        &self,
        device_id: &str,
        position: Duration,
        credential: &Credential,
    ) -> Result<()> {
        let position_ms = position.as_millis().to_string();
        let url = self.endpoint(
            "me/player/seek",
            &[("position_ms", &position_ms), ("device_id", device_id)],
        )?;
        self.command(Method::PUT, url, credential, None).await
    }

    /// Sets the device volume, `volume` being between 0.0 and 1.0.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the provider refuses it.
    pub async fn volume(
        &self,
        device_id: &str,
        volume: f32,
        credential: &Credential,
    ) -> Result<()> {
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (volume.clamp(0.0, 1.0) * 100.0).round() as u8;
        let percent = percent.to_string();
        let url = self.endpoint(
            "me/player/volume",
            &[("volume_percent", &percent), ("device_id", device_id)],
        )?;
        self.command(Method::PUT, url, credential, None).await
    }

    /// Lists the Connect devices available to the user.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed.
    pub async fn devices(&self, credential: &Credential) -> Result<Vec<web_api::Device>> {
        let url = self.endpoint("me/player/devices", &[])?;
        let devices: Devices = self.get(url, credential, "devices").await?;
        Ok(devices.devices)
    }

    /// The user's current playback, or `None` if nothing is active.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed.
    pub async fn player_state(
        &self,
        credential: &Credential,
    ) -> Result<Option<web_api::PlayerState>> {
        let url = self.endpoint("me/player", &[])?;
        let request = self.http_client.get(url, credential)?;
        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        protocol::json(&body, "player").map(Some)
    }

    /// Searches the catalog for tracks matching `query`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed.
    pub async fn search_tracks(&self, query: &str, credential: &Credential) -> Result<Vec<Track>> {
        let limit = Self::SEARCH_LIMIT.to_string();
        let url = self.endpoint("search", &[("q", query), ("type", "track"), ("limit", &limit)])?;
        let response: SearchResponse = self.get(url, credential, "search").await?;
        Ok(response.tracks.items.into_iter().map(Track::from).collect())
    }

    /// Lists the collections the user owns or follows.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed.
    pub async fn playlists(&self, credential: &Credential) -> Result<Vec<Playlist>> {
        let limit = Self::PLAYLIST_LIMIT.to_string();
        let url = self.endpoint("me/playlists", &[("limit", &limit)])?;
        let page: Paging<Playlist> = self.get(url, credential, "playlists").await?;
        Ok(page.items)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::error::ErrorKind;

    async fn api(server: &MockServer) -> WebApi {
        let mut config = Config::new("client").unwrap();
        config.api_url = Url::parse(&format!("{}/v1", server.uri())).unwrap();
        WebApi::new(&config).unwrap()
    }

    fn credential() -> Credential {
        Credential::new("abc123")
    }

    #[tokio::test]
    async fn play_sends_device_scoped_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/play"))
            .and(query_param("device_id", "d1"))
            .and(header("authorization", "Bearer abc123"))
            .and(body_json(serde_json::json!({ "uris": ["spotify:track:t1"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let body = Play::Uris {
            uris: vec!["spotify:track:t1".to_owned()],
        };
        api(&server)
            .await
            .play("d1", &body, &credential())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forbidden_maps_to_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/play"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": { "status": 403, "message": "Player command failed", "reason": "PREMIUM_REQUIRED" }
            })))
            .mount(&server)
            .await;

        let body = Play::Context {
            context_uri: "spotify:playlist:p1".to_owned(),
        };
        let err = api(&server)
            .await
            .play("d1", &body, &credential())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("PREMIUM_REQUIRED"));
    }

    #[tokio::test]
    async fn search_returns_tracks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("q", "warm up"))
            .and(query_param("type", "track"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tracks": {
                    "items": [{
                        "id": "t1",
                        "name": "Warm Up",
                        "uri": "spotify:track:t1",
                        "duration_ms": 200000,
                        "preview_url": null,
                        "artists": [{ "name": "A" }],
                        "album": { "name": "Cardio", "images": [] }
                    }],
                    "total": 1,
                    "next": null
                }
            })))
            .mount(&server)
            .await;

        let tracks = api(&server)
            .await
            .search_tracks("warm up", &credential())
            .await
            .unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "t1");
        assert_eq!(tracks[0].duration, Duration::from_millis(200_000));
    }

    #[tokio::test]
    async fn playlists_are_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/playlists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "p1",
                    "name": "Leg Day",
                    "uri": "spotify:playlist:p1",
                    "images": null,
                    "owner": { "display_name": "coach" },
                    "tracks": { "total": 12 }
                }],
                "total": 1,
                "next": null
            })))
            .mount(&server)
            .await;

        let playlists = api(&server).await.playlists(&credential()).await.unwrap();
        assert_eq!(playlists[0].name, "Leg Day");
        assert_eq!(playlists[0].tracks.total, 12);
    }

    #[tokio::test]
    async fn no_content_means_no_playback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert_eq!(
            api(&server).await.player_state(&credential()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn volume_is_sent_as_percent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/volume"))
            .and(query_param("volume_percent", "35"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .await
            .volume("d1", 0.35, &credential())
            .await
            .unwrap();
    }
}
