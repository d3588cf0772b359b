//! The playback bridge of one session.
//!
//! A [`Bridge`] owns the credential store, the device, the mirror with its
//! subscribers and the command dispatcher. Create one per session and hand
//! references to whatever needs playback; there is no global instance.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use playsync::{bridge::Bridge, credential::FileStorage, handshake::PopupTransport};
//!
//! let bridge = Bridge::with_connect_device(config.clone(), FileStorage::new(state_dir))?;
//! bridge.subscribe(Arc::new(|snapshot| println!("{snapshot:?}")));
//!
//! if !bridge.restore().await {
//!     let mut coordinator = bridge.coordinator(PopupTransport::new(&config));
//!     bridge.authorize(&mut coordinator).await?;
//! }
//!
//! bridge.dispatcher().toggle_play().await;
//! ```

use std::sync::Arc;

use crate::{
    api::WebApi,
    bus::Subscriber,
    config::Config,
    credential::{Credential, CredentialStore, Storage},
    device::{connect::ConnectSdk, DeviceBridge, Sdk},
    dispatcher::Dispatcher,
    error::Result,
    handshake::{Coordinator, HandshakeTransport},
    mirror::{Mirror, Snapshot},
};

pub struct Bridge {
    config: Config,
    store: Arc<CredentialStore>,
    mirror: Arc<Mirror>,
    device: Arc<DeviceBridge>,
    dispatcher: Dispatcher,
}

impl Bridge {
    /// Creates a bridge around `sdk`.
    ///
    /// # Errors
    ///
    /// Returns error if the Web API client cannot be created.
    pub fn new<S, D>(config: Config, storage: S, sdk: D) -> Result<Self>
    where
        S: Storage + 'static,
        D: Sdk + 'static,
    {
        let store = Arc::new(CredentialStore::new(storage));
        let mirror = Arc::new(Mirror::new(config.initial_volume));
        let device = Arc::new(DeviceBridge::new(
            sdk,
            Arc::clone(&store),
            Arc::clone(&mirror),
            config.device_name.clone(),
            config.initial_volume,
            config.ready_timeout,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&mirror),
            Arc::clone(&device),
            WebApi::new(&config)?,
            Arc::clone(&store),
        );

        Ok(Self {
            config,
            store,
            mirror,
            device,
            dispatcher,
        })
    }

    /// Creates a bridge that drives the Connect device named in `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the Web API client cannot be created.
    pub fn with_connect_device<S>(config: Config, storage: S) -> Result<Self>
    where
        S: Storage + 'static,
    {
        let sdk = ConnectSdk::new(&config);
        Self::new(config, storage, sdk)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.mirror.bus().subscribe(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        self.mirror.bus().unsubscribe(subscriber);
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.mirror.snapshot()
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub fn device(&self) -> &DeviceBridge {
        &self.device
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Initializes the device with the stored credential, if there is one.
    pub async fn restore(&self) -> bool {
        match self.store.get() {
            Some(credential) => {
                debug!("restoring session from stored credential");
                self.device.initialize(credential).await
            }
            None => {
                info!("not authenticated");
                false
            }
        }
    }

    /// A handshake coordinator for this bridge's configuration.
    #[must_use]
    pub fn coordinator<T>(&self, transport: T) -> Coordinator<T>
    where
        T: HandshakeTransport,
    {
        Coordinator::new(&self.config, transport)
    }

    /// Runs the handshake and connects with the credential it yields.
    ///
    /// Returns whether the device became ready.
    ///
    /// # Errors
    ///
    /// Returns error if the handshake did not succeed. Nothing is stored
    /// then.
    pub async fn authorize<T>(&self, coordinator: &mut Coordinator<T>) -> Result<bool>
    where
        T: HandshakeTransport,
    {
        let credential = coordinator.authorize().await?;
        Ok(self.connect(credential).await)
    }

    /// Stores `credential` and initializes the device with it.
    pub async fn connect(&self, credential: Credential) -> bool {
        self.store.set(credential.clone());
        self.device.initialize(credential).await
    }

    /// Disconnects the device and forgets the credential.
    pub async fn logout(&self) {
        self.device.disconnect().await;
        self.store.clear();
        info!("logged out");
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("store", &self.store)
            .field("device", &self.device)
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}
