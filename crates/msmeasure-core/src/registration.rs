//! Self-registration with the upstream registry.
//!
//! The service announces its `/device` endpoint to the upstream whenever it has
//! not served a measurement yet, or has been idle for longer than
//! [`STALE_AFTER`]. Announcements are retried every [`RETRY_INTERVAL`] for the
//! lifetime of the process, without backoff or attempt limit.
//!
//! ```text
//!            needs registration          201 / 409 / 200
//!   Stale ------------------------> POST ----------------> Registered
//!     ^                               |                        |
//!     |   transport / status error    |   idle > STALE_AFTER   |
//!     +-------------------------------+------------------------+
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use url::Url;

use crate::error::RegistrationError;
use crate::outbound::Identity;

/// Idle time after which the registration is considered stale.
pub const STALE_AFTER: Duration = Duration::from_secs(10);
/// Pause between two iterations of the registration loop.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Registration state as last observed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Stale,
    Registered,
}

/// Timestamps shared between the request path and the registration loop.
///
/// `last_served_at` is stored as a nanosecond offset from `started_at`; zero
/// means no measurement has been served yet.
#[derive(Debug)]
pub struct RegistrationState {
    started_at: Instant,
    last_served: AtomicU64,
    registered: AtomicBool,
}

impl RegistrationState {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started_at: Instant) -> Self {
        Self {
            started_at,
            last_served: AtomicU64::new(0),
            registered: AtomicBool::new(false),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Record that a measurement was served now.
    pub fn mark_served(&self) {
        self.mark_served_at(Instant::now());
    }

    /// Record that a measurement was served at `at`. Never moves backwards.
    pub fn mark_served_at(&self, at: Instant) {
        let offset = at.saturating_duration_since(self.started_at).as_nanos();
        let offset = u64::try_from(offset).unwrap_or(u64::MAX).max(1);
        self.last_served.fetch_max(offset, Ordering::SeqCst);
    }

    pub fn has_served(&self) -> bool {
        self.last_served.load(Ordering::SeqCst) != 0
    }

    pub fn last_served_at(&self) -> Instant {
        self.started_at + Duration::from_nanos(self.last_served.load(Ordering::SeqCst))
    }

    /// Whether the upstream should be (re-)told about this service at `now`.
    pub fn needs_registration_at(&self, now: Instant) -> bool {
        !self.has_served() || now.saturating_duration_since(self.last_served_at()) > STALE_AFTER
    }

    pub fn status(&self) -> RegistrationStatus {
        if self.registered.load(Ordering::SeqCst) {
            RegistrationStatus::Registered
        } else {
            RegistrationStatus::Stale
        }
    }

    fn set_status(&self, status: RegistrationStatus) {
        self.registered
            .store(status == RegistrationStatus::Registered, Ordering::SeqCst);
    }
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self::new()
    }
}

/// How the upstream acknowledged an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// 201, newly registered.
    Created,
    /// 409, the upstream already knew this device.
    AlreadyRegistered,
    /// 200, accepted without a more specific answer.
    Accepted,
}

/// Outcome of one iteration of the registration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No upstream is configured.
    Idle,
    /// Registration is still fresh.
    Skipped,
    Registered(Acknowledgement),
    Failed,
}

/// Background task keeping this service registered upstream.
pub struct RegistrationAgent {
    upstream: Option<Url>,
    endpoint: String,
    client: reqwest::Client,
    identity: Identity,
    state: Arc<RegistrationState>,
}

impl RegistrationAgent {
    /// `endpoint` is the URL of this service's `/device` route, sent as the
    /// announcement body.
    pub fn new(
        upstream: Option<Url>,
        endpoint: impl Into<String>,
        client: reqwest::Client,
        identity: Identity,
        state: Arc<RegistrationState>,
    ) -> Self {
        Self {
            upstream,
            endpoint: endpoint.into(),
            client,
            identity,
            state,
        }
    }

    /// Loop until the process exits. Returns at once without an upstream.
    pub async fn run(self) {
        let Some(upstream) = self.upstream.as_ref() else {
            log::info!("No upstream configured, skipping registration.");
            return;
        };
        log::info!("Registering '{}' at upstream '{upstream}'.", self.endpoint);

        loop {
            self.tick_at(Instant::now()).await;
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Run one iteration of the loop as if the clock read `now`.
    pub async fn tick_at(&self, now: Instant) -> Tick {
        let Some(upstream) = self.upstream.as_ref() else {
            return Tick::Idle;
        };
        if !self.state.needs_registration_at(now) {
            return Tick::Skipped;
        }

        match self.announce(upstream).await {
            Ok(ack) => {
                self.state.set_status(RegistrationStatus::Registered);
                Tick::Registered(ack)
            }
            Err(err) => {
                self.state.set_status(RegistrationStatus::Stale);
                log::error!("Failed to register at upstream '{upstream}': {err}.");
                log::info!("Retrying registration in {}s.", RETRY_INTERVAL.as_secs());
                Tick::Failed
            }
        }
    }

    /// POST this service's device endpoint to `upstream`.
    pub async fn announce(&self, upstream: &Url) -> Result<Acknowledgement, RegistrationError> {
        let response = self
            .client
            .post(upstream.clone())
            .headers(self.identity.headers(None))
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .body(self.endpoint.clone())
            .send()
            .await
            .map_err(RegistrationError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(RegistrationError::ReadBody)?;

        match status {
            StatusCode::CREATED => {
                log::info!("Registered at upstream '{upstream}'.");
                Ok(Acknowledgement::Created)
            }
            StatusCode::CONFLICT => {
                log::warn!("Upstream reports device as already registered, message was '{body}'.");
                Ok(Acknowledgement::AlreadyRegistered)
            }
            StatusCode::OK => {
                log::debug!("Upstream '{upstream}' accepted registration with 200.");
                Ok(Acknowledgement::Accepted)
            }
            _ => Err(RegistrationError::Status { status, body }),
        }
    }
}
