//! Bridge to the provider's playback device.
//!
//! The vendor SDK is abstracted as a pair of traits: an [`Sdk`] that is
//! loaded once and creates [`Player`]s, and the players themselves. Players
//! never call back into the crate. Instead they publish [`PlayerEvent`]s on
//! the channel handed to them in [`PlayerOptions`], which the
//! [`DeviceBridge`] drains into the [`Mirror`].
//!
//! # Submodules
//!
//! * [`connect`] - A provider Connect device driven through the Web API

pub mod connect;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot, OnceCell},
    task::JoinHandle,
};

use crate::{
    credential::{Credential, CredentialStore},
    error::{Error, Result},
    events::PlayerEvent,
    mirror::Mirror,
};

/// Returns the credential a player should use right now.
///
/// Suppliers never refresh the credential; they only read it.
pub type TokenSupplier = Arc<dyn Fn() -> Option<Credential> + Send + Sync>;

/// Everything a player is constructed with.
#[derive(Clone)]
pub struct PlayerOptions {
    /// Name under which the device appears to the provider.
    pub name: String,
    /// Between 0.0 and 1.0.
    pub volume: f32,
    pub token: TokenSupplier,
    /// Where the player publishes its events.
    pub events: mpsc::UnboundedSender<PlayerEvent>,
}

impl std::fmt::Debug for PlayerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerOptions")
            .field("name", &self.name)
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}

/// The vendor SDK.
#[async_trait]
pub trait Sdk: Send + Sync {
    /// Loads the SDK. Called at most once per [`DeviceBridge`].
    async fn load(&self) -> Result<()>;

    /// Creates a player. The player does nothing until connected.
    ///
    /// # Errors
    ///
    /// Returns error if the SDK cannot create a player.
    fn player(&self, options: PlayerOptions) -> Result<Arc<dyn Player>>;
}

/// A playback device created by an [`Sdk`].
///
/// Command methods only report whether the command was sent. Whether it
/// took effect is told by the next [`PlayerEvent::StateChanged`].
#[async_trait]
pub trait Player: Send + Sync {
    /// Starts connecting. Returns `false` if the player refused to try.
    async fn connect(&self) -> Result<bool>;

    /// Disconnects and stops publishing events.
    async fn disconnect(&self);

    async fn toggle_play(&self) -> Result<()>;
    async fn next_track(&self) -> Result<()>;
    async fn previous_track(&self) -> Result<()>;
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Sets the volume, between 0.0 and 1.0.
    async fn set_volume(&self, volume: f32) -> Result<()>;
}

/// Owns the current player and feeds its events into the [`Mirror`].
pub struct DeviceBridge {
    sdk: Box<dyn Sdk>,
    loaded: OnceCell<()>,
    player: Mutex<Option<Arc<dyn Player>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    store: Arc<CredentialStore>,
    mirror: Arc<Mirror>,
    name: String,
    volume: f32,
    ready_timeout: Duration,
}

impl DeviceBridge {
    #[must_use]
    pub fn new<S>(
        sdk: S,
        store: Arc<CredentialStore>,
        mirror: Arc<Mirror>,
        name: impl Into<String>,
        volume: f32,
        ready_timeout: Duration,
    ) -> Self
    where
        S: Sdk + 'static,
    {
        Self {
            sdk: Box::new(sdk),
            loaded: OnceCell::new(),
            player: Mutex::new(None),
            pump: Mutex::new(None),
            store,
            mirror,
            name: name.into(),
            volume: volume.clamp(0.0, 1.0),
            ready_timeout,
        }
    }

    /// Brings up a player for `credential` and waits until it is ready.
    ///
    /// Any previous player is disconnected first. Returns `false` if the
    /// SDK failed to load, the player reported an error or did not become
    /// ready in time. Initialization and authentication errors clear the
    /// stored credential.
    pub async fn initialize(&self, credential: Credential) -> bool {
        match self.try_initialize(credential).await {
            Ok(device_id) => {
                info!("device \"{}\" ready as {device_id}", self.name);
                true
            }
            Err(e) => {
                error!("device initialization failed: {e}");
                self.teardown().await;
                false
            }
        }
    }

    async fn try_initialize(&self, credential: Credential) -> Result<String> {
        self.loaded
            .get_or_try_init(|| async {
                debug!("loading device sdk");
                self.sdk.load().await
            })
            .await?;

        self.teardown().await;

        // The player reads the credential through the store, so make sure
        // the store holds the one this session was started with.
        if self.store.get().as_ref() != Some(&credential) {
            self.store.set(credential);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let token: TokenSupplier = {
            let store = Arc::clone(&self.store);
            Arc::new(move || store.get())
        };

        let player = self.sdk.player(PlayerOptions {
            name: self.name.clone(),
            volume: self.volume,
            token,
            events: events_tx,
        })?;

        let (decided_tx, decided_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            events_rx,
            Arc::clone(&self.mirror),
            Arc::clone(&self.store),
            decided_tx,
        ));

        *lock(&self.pump) = Some(pump);
        *lock(&self.player) = Some(Arc::clone(&player));

        if !player.connect().await? {
            return Err(Error::unavailable("player refused to connect"));
        }

        match tokio::time::timeout(self.ready_timeout, decided_rx).await? {
            Ok(PlayerEvent::Ready { device_id }) => Ok(device_id),
            Ok(PlayerEvent::InitializationError(e)) => Err(Error::failed_precondition(e)),
            Ok(PlayerEvent::AuthenticationError(e)) => Err(Error::unauthenticated(e)),
            Ok(PlayerEvent::AccountError(e)) => Err(Error::permission_denied(e)),
            Ok(event) => Err(Error::internal(format!("unexpected decision: {event:?}"))),
            Err(_) => Err(Error::aborted("player closed before becoming ready")),
        }
    }

    /// The current player, if any.
    #[must_use]
    pub fn player(&self) -> Option<Arc<dyn Player>> {
        lock(&self.player).clone()
    }

    /// Whether the SDK has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Disconnects the current player and marks the mirror disconnected.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    /// Drops the current player and waits for its event pump to finish, so
    /// that none of its events reach the mirror afterwards.
    async fn teardown(&self) {
        let player = lock(&self.player).take();
        if let Some(player) = player {
            debug!("disconnecting player");
            player.disconnect().await;
        }

        let pump = lock(&self.pump).take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }

        self.mirror.disconnect();
    }
}

impl std::fmt::Debug for DeviceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBridge")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("has_player", &lock(&self.player).is_some())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drains player events into the mirror.
///
/// The first event that decides an initialization is also sent on
/// `decided`, after the mirror has applied it. A player that lost its
/// credential marks the mirror disconnected.
async fn pump(
    mut events: mpsc::UnboundedReceiver<PlayerEvent>,
    mirror: Arc<Mirror>,
    store: Arc<CredentialStore>,
    decided: oneshot::Sender<PlayerEvent>,
) {
    let mut decided = Some(decided);

    while let Some(event) = events.recv().await {
        let revoked = match &event {
            PlayerEvent::InitializationError(e) => {
                error!("initialization error: {e}");
                true
            }
            PlayerEvent::AuthenticationError(e) => {
                error!("authentication error: {e}");
                true
            }
            PlayerEvent::AccountError(e) => {
                error!("account error: {e}");
                false
            }
            PlayerEvent::PlaybackError(e) => {
                warn!("playback error: {e}");
                false
            }
            _ => {
                trace!("{event:?}");
                false
            }
        };

        mirror.apply(&event);
        if revoked {
            store.clear();
            mirror.disconnect();
        }

        if event.is_decisive() {
            if let Some(decided) = decided.take() {
                let _ = decided.send(event);
            }
        }
    }

    trace!("player event channel closed");
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// An SDK whose players record calls and emit scripted events.
    #[derive(Clone, Default)]
    pub struct FakeSdk {
        pub loads: Arc<AtomicUsize>,
        pub players: Arc<Mutex<Vec<Arc<FakePlayer>>>>,
        pub on_connect: Arc<Mutex<Vec<PlayerEvent>>>,
    }

    impl FakeSdk {
        /// An SDK whose players become ready as `device_id`.
        pub fn ready(device_id: &str) -> Self {
            let sdk = Self::default();
            sdk.script(vec![PlayerEvent::Ready {
                device_id: device_id.to_owned(),
            }]);
            sdk
        }

        /// Sets the events emitted when a player connects.
        pub fn script(&self, events: Vec<PlayerEvent>) {
            *self.on_connect.lock().unwrap() = events;
        }

        pub fn last_player(&self) -> Arc<FakePlayer> {
            Arc::clone(self.players.lock().unwrap().last().unwrap())
        }
    }

    #[async_trait]
    impl Sdk for FakeSdk {
        async fn load(&self) -> Result<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn player(&self, options: PlayerOptions) -> Result<Arc<dyn Player>> {
            let player = Arc::new(FakePlayer {
                options,
                on_connect: self.on_connect.lock().unwrap().clone(),
                calls: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                failing: AtomicBool::new(false),
            });
            self.players.lock().unwrap().push(Arc::clone(&player));
            Ok(player)
        }
    }

    pub struct FakePlayer {
        pub options: PlayerOptions,
        on_connect: Vec<PlayerEvent>,
        pub calls: Mutex<Vec<String>>,
        pub connected: AtomicBool,
        pub failing: AtomicBool,
    }

    impl FakePlayer {
        pub fn emit(&self, event: PlayerEvent) {
            let _ = self.options.events.send(event);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.failing.load(Ordering::SeqCst) {
                Err(Error::unavailable("fake failure"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Player for FakePlayer {
        async fn connect(&self) -> Result<bool> {
            self.connected.store(true, Ordering::SeqCst);
            for event in &self.on_connect {
                self.emit(event.clone());
            }
            Ok(true)
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.calls.lock().unwrap().push("disconnect".to_owned());
        }

        async fn toggle_play(&self) -> Result<()> {
            self.record("toggle_play".to_owned())
        }

        async fn next_track(&self) -> Result<()> {
            self.record("next_track".to_owned())
        }

        async fn previous_track(&self) -> Result<()> {
            self.record("previous_track".to_owned())
        }

        async fn seek(&self, position: Duration) -> Result<()> {
            self.record(format!("seek {}", position.as_millis()))
        }

        async fn set_volume(&self, volume: f32) -> Result<()> {
            self.record(format!("set_volume {volume:.2}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{fake::FakeSdk, *};
    use crate::{
        credential::MemoryStorage,
        events::PlayerState,
    };

    fn bridge(sdk: FakeSdk) -> (DeviceBridge, Arc<CredentialStore>, Arc<Mirror>) {
        let store = Arc::new(CredentialStore::new(MemoryStorage::new()));
        let mirror = Arc::new(Mirror::new(0.5));
        let bridge = DeviceBridge::new(
            sdk,
            Arc::clone(&store),
            Arc::clone(&mirror),
            "Gym Portal",
            0.5,
            Duration::from_millis(500),
        );
        (bridge, store, mirror)
    }

    fn counter(mirror: &Mirror) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        mirror.bus().subscribe(Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    #[tokio::test]
    async fn ready_connects_the_mirror() {
        let sdk = FakeSdk::ready("d1");
        let (bridge, store, mirror) = bridge(sdk.clone());

        assert!(bridge.initialize(Credential::new("abc123")).await);
        assert!(mirror.snapshot().connected);
        assert_eq!(mirror.snapshot().device_id.as_deref(), Some("d1"));
        assert_eq!(store.get(), Some(Credential::new("abc123")));

        let player = sdk.last_player();
        assert_eq!(player.options.name, "Gym Portal");
        assert_eq!((player.options.token)(), Some(Credential::new("abc123")));
    }

    #[tokio::test]
    async fn reinitialize_loads_once_and_does_not_duplicate_events() {
        let sdk = FakeSdk::ready("d1");
        let (bridge, _, mirror) = bridge(sdk.clone());

        assert!(bridge.initialize(Credential::new("abc123")).await);
        let first = sdk.last_player();
        assert!(bridge.initialize(Credential::new("abc123")).await);
        let second = sdk.last_player();

        assert_eq!(sdk.loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.calls(), vec!["disconnect".to_owned()]);

        let count = counter(&mirror);
        second.emit(PlayerEvent::StateChanged(Some(PlayerState {
            track: None,
            context: None,
            position: Duration::from_secs(1),
            duration: Duration::from_secs(200),
            paused: false,
        })));
        first.emit(PlayerEvent::StateChanged(None));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(mirror.snapshot().playing);
    }

    #[tokio::test]
    async fn authentication_error_clears_credential() {
        let sdk = FakeSdk::default();
        sdk.script(vec![PlayerEvent::AuthenticationError(
            "invalid token".to_owned(),
        )]);
        let (bridge, store, mirror) = bridge(sdk);

        assert!(!bridge.initialize(Credential::new("expired")).await);
        assert_eq!(store.get(), None);
        assert!(!mirror.snapshot().connected);
    }

    #[tokio::test]
    async fn account_error_keeps_credential() {
        let sdk = FakeSdk::default();
        sdk.script(vec![PlayerEvent::AccountError(
            "premium required".to_owned(),
        )]);
        let (bridge, store, _) = bridge(sdk);

        assert!(!bridge.initialize(Credential::new("abc123")).await);
        assert_eq!(store.get(), Some(Credential::new("abc123")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mirror_is_connected_once_initialize_returns() {
        let (bridge, _, mirror) = bridge(FakeSdk::ready("d1"));

        for _ in 0..200 {
            assert!(bridge.initialize(Credential::new("abc123")).await);
            let snapshot = mirror.snapshot();
            assert!(snapshot.connected);
            assert_eq!(snapshot.device_id.as_deref(), Some("d1"));
        }
    }

    #[tokio::test]
    async fn authentication_error_after_ready_disconnects() {
        let sdk = FakeSdk::ready("d1");
        let (bridge, store, mirror) = bridge(sdk.clone());
        assert!(bridge.initialize(Credential::new("abc123")).await);

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            mirror.bus().subscribe(Arc::new(move |snapshot| {
                seen.lock().unwrap().push(snapshot.connected);
            }));
        }

        sdk.last_player()
            .emit(PlayerEvent::AuthenticationError("expired".to_owned()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get(), None);
        assert!(!mirror.snapshot().connected);
        assert_eq!(mirror.snapshot().device_id, None);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn silent_player_times_out() {
        let (bridge, _, mirror) = bridge(FakeSdk::default());
        assert!(!bridge.initialize(Credential::new("abc123")).await);
        assert!(!mirror.snapshot().connected);
        assert!(bridge.player().is_none());
    }

    #[tokio::test]
    async fn disconnect_marks_mirror() {
        let sdk = FakeSdk::ready("d1");
        let (bridge, _, mirror) = bridge(sdk.clone());
        assert!(bridge.initialize(Credential::new("abc123")).await);

        bridge.disconnect().await;
        assert!(!mirror.snapshot().connected);
        assert_eq!(mirror.snapshot().device_id, None);
        assert!(bridge.player().is_none());
        assert_eq!(sdk.last_player().calls(), vec!["disconnect".to_owned()]);
    }
}
