//! Implicit-grant callback and cross-window message formats.
//!
//! After authorization the provider redirects the secondary window to the
//! redirect URI with the result in the URL fragment:
//!
//! ```text
//! #access_token=<token>&token_type=Bearer&expires_in=3600&state=<echoed>
//! #error=access_denied&state=<echoed>
//! ```
//!
//! The secondary window relays the outcome to its opener as one of two
//! messages:
//!
//! ```json
//! { "type": "AUTH_SUCCESS", "token": "<token>", "state": "<echoed>" }
//! { "type": "AUTH_ERROR", "error": "access_denied" }
//! ```

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::error::Error;

/// The parsed URL fragment of the authorization callback.
///
/// Every field is optional because the provider sends either the token
/// fields or the error fields, and a forged redirect may send anything.
#[derive(Clone, Default, Redact, PartialEq, Eq)]
pub struct Fragment {
    #[redact]
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<Duration>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl FromStr for Fragment {
    type Err = Error;

    /// Parses a fragment with or without its leading `#`.
    ///
    /// Unknown keys are ignored. An `expires_in` that is not a number is
    /// ignored as well, since the bridge does not act on it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('#');
        let mut fragment = Self::default();

        for (key, value) in url::form_urlencoded::parse(s.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => fragment.access_token = Some(value),
                "token_type" => fragment.token_type = Some(value),
                "expires_in" => {
                    fragment.expires_in = value.parse().ok().map(Duration::from_secs);
                }
                "state" => fragment.state = Some(value),
                "error" => fragment.error = Some(value),
                _ => trace!("ignoring callback parameter {key}"),
            }
        }

        Ok(fragment)
    }
}

/// A message posted from the secondary window to its opener.
#[derive(Clone, Redact, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthMessage {
    #[serde(rename = "AUTH_SUCCESS")]
    Success {
        #[redact]
        token: String,
        state: String,
    },

    #[serde(rename = "AUTH_ERROR")]
    Error { error: String },
}

impl AuthMessage {
    /// Decides the message for a callback fragment.
    ///
    /// The fragment's state must equal `expected_state`; anything else is
    /// reported as an error so that no token from a foreign flow is ever
    /// relayed.
    #[must_use]
    pub fn from_fragment(fragment: Fragment, expected_state: &str) -> Self {
        if let Some(error) = fragment.error {
            return Self::Error { error };
        }

        if fragment.state.as_deref() != Some(expected_state) {
            return Self::Error {
                error: "state mismatch".to_owned(),
            };
        }

        match (fragment.access_token, fragment.state) {
            (Some(token), Some(state)) => Self::Success { token, state },
            _ => Self::Error {
                error: "callback carried no access token".to_owned(),
            },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_fragment() {
        let fragment: Fragment =
            "#access_token=abc123&token_type=Bearer&expires_in=3600&state=xyz"
                .parse()
                .unwrap();

        assert_eq!(fragment.access_token.as_deref(), Some("abc123"));
        assert_eq!(fragment.token_type.as_deref(), Some("Bearer"));
        assert_eq!(fragment.expires_in, Some(Duration::from_secs(3600)));
        assert_eq!(fragment.state.as_deref(), Some("xyz"));
        assert_eq!(fragment.error, None);
    }

    #[test]
    fn parses_encoded_values() {
        let fragment: Fragment = "error=access%20denied&state=a%2Bb".parse().unwrap();
        assert_eq!(fragment.error.as_deref(), Some("access denied"));
        assert_eq!(fragment.state.as_deref(), Some("a+b"));
    }

    #[test]
    fn matching_state_yields_success() {
        let fragment = "access_token=abc123&state=xyz".parse().unwrap();
        let message = AuthMessage::from_fragment(fragment, "xyz");
        assert_eq!(
            message,
            AuthMessage::Success {
                token: "abc123".to_owned(),
                state: "xyz".to_owned()
            }
        );
    }

    #[test]
    fn mismatched_state_yields_error() {
        let fragment = "access_token=abc123&state=forged".parse().unwrap();
        let message = AuthMessage::from_fragment(fragment, "xyz");
        assert!(!message.is_success());
    }

    #[test]
    fn missing_state_yields_error() {
        let fragment = "access_token=abc123".parse().unwrap();
        assert!(!AuthMessage::from_fragment(fragment, "xyz").is_success());
    }

    #[test]
    fn provider_error_wins() {
        let fragment = "error=access_denied&state=xyz".parse().unwrap();
        assert_eq!(
            AuthMessage::from_fragment(fragment, "xyz"),
            AuthMessage::Error {
                error: "access_denied".to_owned()
            }
        );
    }

    #[test]
    fn messages_use_typed_wire_format() {
        let json = serde_json::to_value(AuthMessage::Success {
            token: "abc123".to_owned(),
            state: "xyz".to_owned(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "AUTH_SUCCESS", "token": "abc123", "state": "xyz" })
        );

        let message: AuthMessage =
            serde_json::from_value(serde_json::json!({ "type": "AUTH_ERROR", "error": "nope" }))
                .unwrap();
        assert_eq!(
            message,
            AuthMessage::Error {
                error: "nope".to_owned()
            }
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let message = AuthMessage::Success {
            token: "supersecret".to_owned(),
            state: "xyz".to_owned(),
        };
        assert!(!format!("{message:?}").contains("supersecret"));
    }
}
