//! The system browser as secondary window.
//!
//! The browser is sent to the authorization URL. Its redirect lands on a
//! loopback listener bound to the redirect URI. URL fragments never reach
//! a server, so the callback page reads `location.hash` and forwards it to
//! `/relay`, where the listener hands it to the [`SecondaryWindow`] and
//! shuts down.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::{extract::RawQuery, http::StatusCode, response::Html, routing::get, Router};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{HandshakeTransport, SecondaryWindow};
use crate::{
    config::Config,
    error::{Error, Result},
};

const CALLBACK_PAGE: &str = r"<!doctype html>
<html>
<head><meta charset='utf-8'><title>Authorization</title></head>
<body>
<p id='status'>Completing authorization&hellip;</p>
<script>
fetch('/relay?' + window.location.hash.substring(1))
    .then(function (response) { return response.text(); })
    .then(function (text) {
        document.getElementById('status').textContent = text;
        window.close();
    });
</script>
</body>
</html>";

type Slot = Arc<Mutex<Option<SecondaryWindow>>>;

pub struct PopupTransport {
    redirect_uri: Url,
    listener: Option<CancellationToken>,
}

impl PopupTransport {
    /// Path the callback page forwards the fragment to.
    pub const RELAY_PATH: &'static str = "/relay";

    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            redirect_uri: config.redirect_uri.clone(),
            listener: None,
        }
    }

    fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cancel();
        }
    }

    fn router(callback_path: &str, slot: Slot, done: CancellationToken) -> Router {
        Router::new()
            .route(callback_path, get(|| async { Html(CALLBACK_PAGE) }))
            .route(
                Self::RELAY_PATH,
                get(move |RawQuery(query): RawQuery| {
                    let slot = Arc::clone(&slot);
                    let done = done.clone();
                    async move {
                        let window = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                        let Some(window) = window else {
                            return (StatusCode::GONE, "This authorization has already ended.");
                        };

                        let success = window.receive_redirect(query.as_deref().unwrap_or_default());
                        done.cancel();

                        if success {
                            (
                                StatusCode::OK,
                                "Authorization complete. You can close this window.",
                            )
                        } else {
                            (
                                StatusCode::FORBIDDEN,
                                "Authorization failed. You can close this window.",
                            )
                        }
                    }
                }),
            )
    }
}

#[async_trait]
impl HandshakeTransport for PopupTransport {
    async fn open(&mut self, url: Url, window: SecondaryWindow) -> Result<()> {
        self.stop();

        let host = self
            .redirect_uri
            .host_str()
            .ok_or_else(|| Error::invalid_argument("redirect uri has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = self
            .redirect_uri
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_argument("redirect uri has no port"))?;

        let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
        debug!("listening for the authorization callback on {host}:{port}");

        let done = CancellationToken::new();
        let slot: Slot = Arc::new(Mutex::new(Some(window)));
        let app = Self::router(self.redirect_uri.path(), slot, done.clone());

        let shutdown = done.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("callback listener failed: {e}");
            }
            trace!("callback listener stopped");
        });

        if let Err(e) = open::that(url.as_str()) {
            done.cancel();
            return Err(Error::unavailable(format!("cannot open browser: {e}")));
        }

        info!("opened browser for authorization");
        self.listener = Some(done);
        Ok(())
    }
}

impl Drop for PopupTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PopupTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopupTransport")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}
