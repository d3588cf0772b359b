//! HTTP client with rate limiting and bearer authorization for the provider
//! Web API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting so that polling never floods the provider
//! * The `Authorization: Bearer` header on every request
//! * Consistent timeouts and headers
//!
//! # Example
//!
//! ```rust
//! use playsync::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url, &credential)?;
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE},
    Body, Method, Url,
};

use crate::{config::Config, credential::Credential, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window of the rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum calls per interval. The provider does not document its
    /// quota; this is well below where it starts answering `429`.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 120;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds an authorized request with specified method, URL and body.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the credential cannot be used as a header
    /// value.
    pub fn request<U, T>(
        &self,
        method: Method,
        url: U,
        credential: &Credential,
        body: T,
    ) -> Result<reqwest::Request>
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))?;
        authorization.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, authorization)?;
        *request.body_mut() = Some(body.into());

        Ok(request)
    }

    /// Builds an authorized GET request without body.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn get<U>(&self, url: U, credential: &Credential) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        self.request(Method::GET, url, credential, Body::from(""))
    }

    /// Builds an authorized request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns error if `body` cannot be serialized or the credential
    /// cannot be used as a header value.
    pub fn json<U, T>(
        &self,
        method: Method,
        url: U,
        credential: &Credential,
        body: &T,
    ) -> Result<reqwest::Request>
    where
        U: Into<Url>,
        T: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        let mut request = self.request(method, url, credential, body)?;
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, HeaderValue::from_static("application/json"))?;

        Ok(request)
    }

    /// Executes a request with rate limiting.
    ///
    /// Only transport failures are errors; non-success statuses are left to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be sent or timed out.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        trace!("{} {}", request.method(), request.url().path());
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
