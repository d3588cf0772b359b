//! A provider Connect device driven through the Web API.
//!
//! The device itself is any Connect endpoint the user has running under
//! the configured name (a desktop app, a speaker, a librespot instance).
//! [`ConnectSdk`] finds it by name, reports it ready, and then polls the
//! player endpoint, publishing [`PlayerEvent::StateChanged`] whenever the
//! reported state departs from what undisturbed playback would look like.
//!
//! Commands go through the player endpoints scoped to the device id. After
//! a command the next poll happens right away, so that its confirmation
//! arrives without waiting a full interval.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{Notify, OnceCell},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{Player, PlayerOptions, Sdk};
use crate::{
    api::WebApi,
    config::Config,
    credential::Credential,
    error::{Error, ErrorKind, Result},
    events::{PlayerEvent, PlayerState},
    protocol::web_api,
    track::Track,
};

/// Loads a [`WebApi`] client and creates [`ConnectPlayer`]s with it.
pub struct ConnectSdk {
    config: Config,
    api: OnceCell<Arc<WebApi>>,
}

impl ConnectSdk {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            api: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Sdk for ConnectSdk {
    async fn load(&self) -> Result<()> {
        self.api
            .get_or_try_init(|| async { WebApi::new(&self.config).map(Arc::new) })
            .await
            .map(|_| ())
    }

    fn player(&self, options: PlayerOptions) -> Result<Arc<dyn Player>> {
        let api = self
            .api
            .get()
            .ok_or_else(|| Error::failed_precondition("sdk not loaded"))?;

        Ok(Arc::new(ConnectPlayer::new(
            Arc::clone(api),
            options,
            self.config.poll_interval,
        )))
    }
}

/// State shared between a player and its polling task.
struct Shared {
    api: Arc<WebApi>,
    options: PlayerOptions,
    device_id: Mutex<Option<String>>,
    /// Last paused flag seen; decides what toggling does.
    paused: AtomicBool,
    refresh: Notify,
}

impl Shared {
    fn emit(&self, event: PlayerEvent) {
        if self.options.events.send(event).is_err() {
            trace!("player event dropped: nobody is listening");
        }
    }

    fn device_id(&self) -> Option<String> {
        self.device_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_device_id(&self, device_id: Option<String>) {
        *self.device_id.lock().unwrap_or_else(PoisonError::into_inner) = device_id;
    }

    fn credential(&self) -> Result<Credential> {
        (self.options.token)().ok_or_else(|| Error::unauthenticated("no credential available"))
    }
}

pub struct ConnectPlayer {
    shared: Arc<Shared>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectPlayer {
    fn new(api: Arc<WebApi>, options: PlayerOptions, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                options,
                device_id: Mutex::new(None),
                paused: AtomicBool::new(true),
                refresh: Notify::new(),
            }),
            poll_interval,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Runs a device-scoped command and polls right after.
    async fn command<F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(Arc<WebApi>, String, Credential) -> Fut + Send,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let device_id = self
            .shared
            .device_id()
            .ok_or_else(|| Error::failed_precondition("device not ready"))?;
        let credential = self.shared.credential()?;

        debug!("{name} on {device_id}");
        let result = f(Arc::clone(&self.shared.api), device_id, credential).await;
        match &result {
            Ok(()) => self.shared.refresh.notify_one(),
            Err(e) => self.shared.emit(PlayerEvent::PlaybackError(format!("{name}: {e}"))),
        }

        result
    }
}

#[async_trait]
impl Player for ConnectPlayer {
    async fn connect(&self) -> Result<bool> {
        if self.shutdown.is_cancelled() {
            return Ok(false);
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            info!("looking for device \"{}\"", self.shared.options.name);
            let poller = Poller::new(Arc::clone(&self.shared), self.poll_interval);
            *task = Some(tokio::spawn(poller.run(self.shutdown.clone())));
        }

        Ok(true)
    }

    async fn disconnect(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("polling task failed: {e}");
            }
        }
        self.shared.set_device_id(None);
    }

    async fn toggle_play(&self) -> Result<()> {
        if self.shared.paused.load(Ordering::Acquire) {
            self.command("resume", |api, device_id, credential| async move {
                api.resume(&device_id, &credential).await
            })
            .await
        } else {
            self.command("pause", |api, device_id, credential| async move {
                api.pause(&device_id, &credential).await
            })
            .await
        }
    }

    async fn next_track(&self) -> Result<()> {
        self.command("next", |api, device_id, credential| async move {
            api.next(&device_id, &credential).await
        })
        .await
    }

    async fn previous_track(&self) -> Result<()> {
        self.command("previous", |api, device_id, credential| async move {
            api.previous(&device_id, &credential).await
        })
        .await
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.command("seek", move |api, device_id, credential| async move {
            api.seek(&device_id, position, &credential).await
        })
        .await
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.command("volume", move |api, device_id, credential| async move {
            api.volume(&device_id, volume, &credential).await
        })
        .await
    }
}

impl Drop for ConnectPlayer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The polling loop of one player.
struct Poller {
    shared: Arc<Shared>,
    interval: Duration,
    /// Last state published, and when it was polled.
    last: Option<(Option<PlayerState>, Instant)>,
    ticks: u32,
}

impl Poller {
    /// Polls between device list checks while the device is known.
    const DEVICE_CHECK_TICKS: u32 = 10;

    /// Position drift still counted as undisturbed playback.
    const POSITION_TOLERANCE: Duration = Duration::from_millis(1500);

    fn new(shared: Arc<Shared>, interval: Duration) -> Self {
        Self {
            shared,
            interval,
            last: None,
            ticks: 0,
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                () = self.shared.refresh.notified() => {}
                _ = ticker.tick() => {}
            }

            if self.tick().await.is_break() {
                break;
            }
        }

        debug!("stopped polling \"{}\"", self.shared.options.name);
    }

    async fn tick(&mut self) -> ControlFlow<()> {
        let credential = match self.shared.credential() {
            Ok(credential) => credential,
            Err(e) => return self.fail(e),
        };

        let device_id = match self.shared.device_id() {
            Some(device_id) => device_id,
            None => match self.resolve(&credential).await {
                Ok(Some(device_id)) => device_id,
                Ok(None) => return ControlFlow::Continue(()),
                Err(e) => return self.fail(e),
            },
        };

        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % Self::DEVICE_CHECK_TICKS == 0 {
            match self.find(&credential).await {
                Ok(Some(id)) if id == device_id => {}
                Ok(_) => {
                    warn!("device {device_id} went away");
                    self.shared.set_device_id(None);
                    self.last = None;
                    self.shared.emit(PlayerEvent::NotReady { device_id });
                    return ControlFlow::Continue(());
                }
                Err(e) => return self.fail(e),
            }
        }

        match self.shared.api.player_state(&credential).await {
            Ok(state) => {
                let state = state.and_then(|state| local_state(state, &device_id));
                self.publish(state);
                ControlFlow::Continue(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Finds the device by name and reports it ready.
    async fn resolve(&mut self, credential: &Credential) -> Result<Option<String>> {
        let Some(device_id) = self.find(credential).await? else {
            trace!("device \"{}\" not visible yet", self.shared.options.name);
            return Ok(None);
        };

        self.shared.set_device_id(Some(device_id.clone()));
        self.shared.emit(PlayerEvent::Ready {
            device_id: device_id.clone(),
        });

        let volume = self.shared.options.volume;
        if let Err(e) = self
            .shared
            .api
            .volume(&device_id, volume, credential)
            .await
        {
            warn!("could not set initial volume: {e}");
        }

        Ok(Some(device_id))
    }

    async fn find(&self, credential: &Credential) -> Result<Option<String>> {
        let devices = self.shared.api.devices(credential).await?;
        Ok(devices
            .into_iter()
            .filter(|device| !device.is_restricted)
            .find(|device| device.name == self.shared.options.name)
            .and_then(|device| device.id))
    }

    /// Publishes `state` unless it merely continues the last one.
    fn publish(&mut self, state: Option<PlayerState>) {
        let now = Instant::now();
        let unchanged = match (&self.last, &state) {
            (Some((Some(previous), at)), Some(current)) => current.continues(
                previous,
                now.duration_since(*at),
                Self::POSITION_TOLERANCE,
            ),
            (Some((None, _)), None) => true,
            _ => false,
        };

        if let Some(current) = &state {
            self.shared.paused.store(current.paused, Ordering::Release);
        } else {
            self.shared.paused.store(true, Ordering::Release);
        }

        if !unchanged {
            self.shared.emit(PlayerEvent::StateChanged(state.clone()));
        }
        self.last = Some((state, now));
    }

    /// Reports `e` and decides whether polling can go on.
    fn fail(&self, e: Error) -> ControlFlow<()> {
        match e.kind {
            ErrorKind::Unauthenticated => {
                self.shared
                    .emit(PlayerEvent::AuthenticationError(e.to_string()));
                ControlFlow::Break(())
            }
            ErrorKind::PermissionDenied => {
                self.shared.emit(PlayerEvent::AccountError(e.to_string()));
                ControlFlow::Break(())
            }
            _ => {
                warn!("polling failed: {e}");
                ControlFlow::Continue(())
            }
        }
    }
}

/// The state of this device, or `None` if playback is elsewhere.
fn local_state(state: web_api::PlayerState, device_id: &str) -> Option<PlayerState> {
    if state.device.id.as_deref() != Some(device_id) {
        return None;
    }

    let track = state.item.map(Track::from);
    Some(PlayerState {
        duration: track.as_ref().map_or(Duration::ZERO, |track| track.duration),
        track,
        context: state.context.map(|context| context.uri),
        position: state.progress.unwrap_or_default(),
        paused: !state.is_playing,
    })
}
