use async_trait::async_trait;
use url::Url;

use super::{HandshakeTransport, SecondaryWindow};
use crate::error::Result;

/// Opens "windows" by calling a function.
///
/// The function gets the authorization URL and returns the callback
/// fragment, or `None` if the user gave up. An error means no window could
/// be opened at all.
///
/// # Example
///
/// ```rust
/// use playsync::handshake::{Coordinator, DirectTransport};
///
/// let transport = DirectTransport::new(|url: &Url| {
///     println!("open {url} and paste the fragment you are redirected to");
///     read_fragment()
/// });
/// let mut coordinator = Coordinator::new(&config, transport);
/// let credential = coordinator.authorize().await?;
/// ```
pub struct DirectTransport<F> {
    callback: F,
}

impl<F> DirectTransport<F>
where
    F: FnMut(&Url) -> Result<Option<String>> + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> HandshakeTransport for DirectTransport<F>
where
    F: FnMut(&Url) -> Result<Option<String>> + Send,
{
    async fn open(&mut self, url: Url, window: SecondaryWindow) -> Result<()> {
        match (self.callback)(&url)? {
            Some(fragment) => {
                let _ = window.receive_redirect(&fragment);
            }
            None => window.close(),
        }

        Ok(())
    }
}

impl<F> std::fmt::Debug for DirectTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectTransport").finish_non_exhaustive()
    }
}
