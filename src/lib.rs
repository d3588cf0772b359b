//! Playback synchronization bridge for a streaming provider.
//!
//! Connects a music control surface to the provider's playback device and
//! Web API: it acquires and keeps a credential, brings up the device, mirrors
//! the device's playback state and routes commands to the device or the Web
//! API. Observers subscribe to immutable snapshots of the mirrored state.
//!
//! Start with [`bridge::Bridge`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod api;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod credential;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handshake;
pub mod http;
pub mod mirror;
pub mod protocol;
pub mod track;
