//! Authorization handshake.
//!
//! The provider grants a credential through the OAuth implicit grant: a
//! secondary window is sent to the authorization endpoint, the provider
//! redirects it back with the token in the URL fragment, and the window
//! relays the outcome to its opener as a message. A random anti-forgery
//! state ties the redirect to the flow that started it.
//!
//! The [`Coordinator`] is the opener. It moves through
//!
//! ```text
//! Idle -> AwaitingPopup -> Success | Error | Cancelled
//! ```
//!
//! and only accepts messages from its own origin that echo its state. How
//! the secondary window comes to exist is up to the [`HandshakeTransport`]:
//!
//! * [`PopupTransport`] - The system browser plus a loopback listener on
//!   the redirect URI
//! * [`DirectTransport`] - A function that returns the callback fragment
//!
//! The window holds the only sender of the opener's inbox. A window that
//! closes without posting therefore shows up as a closed inbox, which the
//! coordinator reports as [`HandshakeState::Cancelled`].

mod direct;
mod popup;
mod window;

pub use direct::DirectTransport;
pub use popup::PopupTransport;
pub use window::{SecondaryWindow, WindowMessage};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    config::Config,
    credential::Credential,
    error::{Error, Result},
    protocol::auth::AuthMessage,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HandshakeState {
    #[default]
    Idle,
    AwaitingPopup,
    Success,
    Error(String),
    Cancelled,
}

/// Opens secondary windows.
#[async_trait]
pub trait HandshakeTransport: Send {
    /// Opens a window at `url`. The window reports back through `window`.
    ///
    /// # Errors
    ///
    /// Returns error if no window could be opened, for instance because
    /// popups are blocked.
    async fn open(&mut self, url: Url, window: SecondaryWindow) -> Result<()>;
}

/// The anti-forgery state of a running handshake and its inbox.
struct AuthSession {
    state: String,
    inbox: mpsc::UnboundedReceiver<WindowMessage>,
}

pub struct Coordinator<T> {
    config: Config,
    transport: T,
    state: HandshakeState,
    session: Option<AuthSession>,
}

impl<T> Coordinator<T>
where
    T: HandshakeTransport,
{
    #[must_use]
    pub fn new(config: &Config, transport: T) -> Self {
        Self {
            config: config.clone(),
            transport,
            state: HandshakeState::Idle,
            session: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// The authorization URL for a flow with anti-forgery `state`.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "token")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("state", state);
        url
    }

    /// Starts a handshake with a fresh anti-forgery state.
    ///
    /// A handshake that is still running is abandoned.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot open a window. The state is
    /// then [`HandshakeState::Error`].
    pub async fn begin(&mut self) -> Result<()> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        self.begin_with_state(state).await
    }

    pub(crate) async fn begin_with_state(&mut self, state: String) -> Result<()> {
        if self.session.take().is_some() {
            debug!("abandoning running handshake");
        }

        let (opener, inbox) = mpsc::unbounded_channel();
        let window = SecondaryWindow::new(self.config.origin(), state.clone(), opener);
        let url = self.authorize_url(&state);

        self.session = Some(AuthSession { state, inbox });
        self.state = HandshakeState::AwaitingPopup;

        if let Err(e) = self.transport.open(url, window).await {
            error!("could not open authorization window: {e}");
            self.session = None;
            self.state = HandshakeState::Error(format!("popup blocked: {e}"));
            return Err(e);
        }

        debug!("awaiting authorization");
        Ok(())
    }

    /// Handles a message posted to the opener.
    ///
    /// Messages from other origins and of other types are ignored. Returns
    /// the credential if the message completed the handshake.
    pub fn receive(&mut self, message: WindowMessage) -> Option<Credential> {
        let Some(expected) = self.session.as_ref().map(|session| session.state.clone()) else {
            debug!("ignoring message: no handshake running");
            return None;
        };

        let origin = self.config.origin();
        if message.origin != origin {
            warn!(
                "ignoring message from {} (expected {origin})",
                message.origin
            );
            return None;
        }

        let message = match serde_json::from_value::<AuthMessage>(message.data) {
            Ok(message) => message,
            Err(e) => {
                debug!("ignoring message of unknown type: {e}");
                return None;
            }
        };

        match message {
            AuthMessage::Success { token, state } => {
                self.session = None;
                if state == expected {
                    info!("authorization succeeded");
                    self.state = HandshakeState::Success;
                    Some(Credential::new(token))
                } else {
                    error!("authorization rejected: state mismatch");
                    self.state = HandshakeState::Error("state mismatch".to_owned());
                    None
                }
            }
            AuthMessage::Error { error } => {
                error!("authorization failed: {error}");
                self.session = None;
                self.state = HandshakeState::Error(error);
                None
            }
        }
    }

    /// Waits for the running handshake to end.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if no handshake is running, `Cancelled`
    /// if the window closed without reporting, or `PermissionDenied` if
    /// the provider or the state check rejected the authorization.
    pub async fn complete(&mut self) -> Result<Credential> {
        loop {
            let Some(session) = self.session.as_mut() else {
                return match &self.state {
                    HandshakeState::Error(reason) => Err(Error::permission_denied(reason.clone())),
                    HandshakeState::Cancelled => Err(Error::cancelled("authorization cancelled")),
                    _ => Err(Error::failed_precondition("no handshake running")),
                };
            };

            match session.inbox.recv().await {
                Some(message) => {
                    if let Some(credential) = self.receive(message) {
                        return Ok(credential);
                    }
                }
                None => {
                    info!("authorization window closed");
                    self.cancel();
                }
            }
        }
    }

    /// Runs a full handshake.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::begin`] and [`Coordinator::complete`].
    pub async fn authorize(&mut self) -> Result<Credential> {
        self.begin().await?;
        self.complete().await
    }

    /// Abandons the running handshake, if any.
    pub fn cancel(&mut self) {
        if self.session.take().is_some() {
            self.state = HandshakeState::Cancelled;
        }
    }
}

impl<T> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state)
            .field("running", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
