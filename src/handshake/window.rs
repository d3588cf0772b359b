use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::auth::{AuthMessage, Fragment};

/// A message posted to the opener, with the origin of its sender.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

/// The secondary window of one handshake.
///
/// The window handles exactly one redirect and then closes. Dropping it
/// closes it as well, which the opener notices.
#[derive(Debug)]
pub struct SecondaryWindow {
    origin: String,
    expected_state: String,
    opener: mpsc::UnboundedSender<WindowMessage>,
}

impl SecondaryWindow {
    pub(crate) fn new(
        origin: String,
        expected_state: String,
        opener: mpsc::UnboundedSender<WindowMessage>,
    ) -> Self {
        Self {
            origin,
            expected_state,
            opener,
        }
    }

    /// Handles the provider's redirect to the callback and closes.
    ///
    /// `fragment` is the URL fragment of the callback, with or without its
    /// leading `#`. Returns whether the window relayed a credential.
    #[must_use = "the handshake outcome is also reported to the opener"]
    pub fn receive_redirect(self, fragment: &str) -> bool {
        let message = match fragment.parse::<Fragment>() {
            Ok(fragment) => AuthMessage::from_fragment(fragment, &self.expected_state),
            Err(e) => AuthMessage::Error {
                error: format!("malformed callback: {e}"),
            },
        };

        let success = message.is_success();
        if !success {
            debug!("callback rejected: {message:?}");
        }

        self.post_message(&message) && success
    }

    /// Posts `data` to the opener. Returns whether the opener is still
    /// listening.
    pub fn post_message<T>(&self, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                error!("cannot post message: {e}");
                return false;
            }
        };

        self.opener
            .send(WindowMessage {
                origin: self.origin.clone(),
                data,
            })
            .is_ok()
    }

    /// Closes the window without reporting anything.
    pub fn close(self) {
        trace!("secondary window closed");
    }
}
