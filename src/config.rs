//! Bridge configuration.
//!
//! A [`Config`] is built from defaults that target the Spotify Web API and
//! Web Playback endpoints, optionally overlaid with a TOML file:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! redirect_uri = "http://127.0.0.1:8888/callback"
//! device_name = "Gym Portal"
//! scopes = ["streaming", "user-read-playback-state"]
//! ```
//!
//! Only `client_id` is required in the file.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Scopes the playback bridge needs from the provider.
pub const DEFAULT_SCOPES: &[&str] = &[
    "streaming",
    "user-read-email",
    "user-read-private",
    "user-read-playback-state",
    "user-modify-playback-state",
    "playlist-read-private",
];

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    /// Public OAuth client id registered with the provider.
    pub client_id: String,
    pub scopes: Vec<String>,

    /// Provider authorization endpoint for the implicit grant.
    pub auth_url: Url,
    /// Base of the provider Web API, without trailing slash.
    pub api_url: Url,
    /// Where the provider redirects the secondary window to.
    pub redirect_uri: Url,

    /// Name the playback device announces itself with.
    pub device_name: String,
    /// Initial device volume in the range 0.0 to 1.0.
    pub initial_volume: f32,

    pub user_agent: String,

    /// How often the device is asked for its state.
    pub poll_interval: Duration,
    /// How long initialization waits for the device to become ready.
    pub ready_timeout: Duration,
}

/// On-disk representation; every field but `client_id` is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct File {
    client_id: String,
    scopes: Option<Vec<String>>,
    auth_url: Option<Url>,
    api_url: Option<Url>,
    redirect_uri: Option<Url>,
    device_name: Option<String>,
    initial_volume: Option<f32>,
    poll_interval_ms: Option<u64>,
    ready_timeout_ms: Option<u64>,
}

impl Config {
    const AUTH_URL: &'static str = "https://accounts.spotify.com/authorize";
    const API_URL: &'static str = "https://api.spotify.com/v1";
    const REDIRECT_URI: &'static str = "http://127.0.0.1:8888/callback";

    /// Configuration files are small; anything larger is rejected unread.
    const MAX_FILE_SIZE: u64 = 4096;

    /// Creates a configuration with defaults for everything but the client
    /// id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the application name, version or the
    /// operating system name cannot form a valid `User-Agent`.
    pub fn new(client_id: impl Into<String>) -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        if os_name.is_empty() || os_name.contains(illegal_chars) {
            return Err(Error::invalid_argument(format!(
                "os name invalid (\"{os_name}\")"
            )));
        }

        // Some distributions report versions like "n/a"; those are not worth failing over.
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            device_name: app_name.clone(),
            app_name,
            app_version,
            app_lang,

            client_id: client_id.into(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),

            auth_url: Url::parse(Self::AUTH_URL)?,
            api_url: Url::parse(Self::API_URL)?,
            redirect_uri: Url::parse(Self::REDIRECT_URI)?,

            initial_volume: 0.5,

            user_agent,

            poll_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        })
    }

    /// Loads a configuration file, filling in defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, is not
    /// valid TOML or has an empty `client_id`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// The origin the primary window runs on.
    ///
    /// Handshake messages are only accepted from this origin.
    #[must_use]
    pub fn origin(&self) -> String {
        self.redirect_uri.origin().ascii_serialization()
    }

    /// Builds a URL below the Web API base.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the joined URL is not valid.
    pub fn api_endpoint(&self, path: &str) -> Result<Url> {
        let base = self.api_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(Into::into)
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let file: File = toml::from_str(s)?;
        if file.client_id.trim().is_empty() {
            return Err(Error::invalid_argument("client_id must not be empty"));
        }

        let mut config = Self::new(file.client_id)?;
        if let Some(scopes) = file.scopes {
            config.scopes = scopes;
        }
        if let Some(auth_url) = file.auth_url {
            config.auth_url = auth_url;
        }
        if let Some(api_url) = file.api_url {
            config.api_url = api_url;
        }
        if let Some(redirect_uri) = file.redirect_uri {
            config.redirect_uri = redirect_uri;
        }
        if let Some(device_name) = file.device_name {
            config.device_name = device_name;
        }
        if let Some(volume) = file.initial_volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(Error::out_of_range(format!(
                    "initial_volume must be between 0.0 and 1.0 but is {volume}"
                )));
            }
            config.initial_volume = volume;
        }
        if let Some(ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms.max(100));
        }
        if let Some(ms) = file.ready_timeout_ms {
            config.ready_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
