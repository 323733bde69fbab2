//! Random number sources feeding the simulated device.
//!
//! The configured target string is parsed once into a [`RandomTarget`]:
//!
//! - empty: an in-process generator seeded from the clock at startup;
//! - starting with `/` or `.`: a shell command whose output reports
//!   `... received <n> from <server>`;
//! - anything else: a REST service answering `{ value, name, version }`.
//!
//! Sampling never fails. Any error is logged and replaced by
//! [`RandomSample::failed`].

use std::fmt;
use std::future::Future;
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::process::Command;
use url::Url;

use crate::device::SAMPLE_DOMAIN;
use crate::error::{ConfigError, SampleError};
use crate::outbound::Identity;

/// Name reported by the in-process generator.
pub const INTERNAL_NAME: &str = "internal";
/// Version reported by the in-process generator.
pub const INTERNAL_VERSION: &str = "0.0.1";
/// Name reported when a sample could not be obtained.
pub const FAILED_NAME: &str = "failed";
/// Version reported whenever the source has none.
pub const NO_VERSION: &str = "n/a";

static REPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:.*\s)?received\s+["']?(?P<value>\d+)["']?\s+from\s+["']?(?P<server>.*?)["']?\.?$"#,
    )
    .expect("report line pattern is valid")
});

/// One random value together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomSample {
    pub value: i64,
    pub source_name: String,
    pub source_version: String,
}

impl RandomSample {
    /// Sentinel returned when the source failed.
    pub fn failed() -> Self {
        Self {
            value: 0,
            source_name: FAILED_NAME.to_string(),
            source_version: NO_VERSION.to_string(),
        }
    }

    /// Whether this is the failure sentinel.
    pub fn is_failed(&self) -> bool {
        self.source_name == FAILED_NAME
    }
}

/// Where random numbers come from, decided by the shape of the target string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomTarget {
    Internal,
    Command(String),
    Rest(Url),
}

impl RandomTarget {
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let target = target.trim();
        if target.is_empty() {
            return Ok(Self::Internal);
        }
        if target.starts_with('/') || target.starts_with('.') {
            return Ok(Self::Command(target.to_string()));
        }
        Url::parse(target)
            .map(Self::Rest)
            .map_err(|source| ConfigError::InvalidRandomSvc {
                url: target.to_string(),
                source,
            })
    }
}

impl fmt::Display for RandomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal generator"),
            Self::Command(cmd) => write!(f, "command '{cmd}'"),
            Self::Rest(url) => write!(f, "random svc '{url}'"),
        }
    }
}

/// Anything that can produce a [`RandomSample`] for an inbound request.
pub trait Sampler: Send + Sync {
    fn sample(&self, inbound: &HeaderMap) -> impl Future<Output = RandomSample> + Send;
}

/// The configured random source.
pub struct RandomSource {
    target: RandomTarget,
    strategy: Strategy,
}

enum Strategy {
    Internal(Mutex<StdRng>),
    Command(String),
    Rest {
        url: Url,
        client: reqwest::Client,
        identity: Identity,
    },
}

impl RandomSource {
    /// Build the source for `target`. `client` and `identity` are only used by
    /// the REST strategy.
    pub fn new(target: RandomTarget, client: reqwest::Client, identity: Identity) -> Self {
        let strategy = match &target {
            RandomTarget::Internal => Strategy::Internal(Mutex::new(clock_seeded_rng())),
            RandomTarget::Command(cmd) => Strategy::Command(cmd.clone()),
            RandomTarget::Rest(url) => Strategy::Rest {
                url: url.clone(),
                client,
                identity,
            },
        };
        Self { target, strategy }
    }

    /// In-process generator with a fixed seed, for reproducible runs.
    pub fn internal_with_seed(seed: u64) -> Self {
        Self {
            target: RandomTarget::Internal,
            strategy: Strategy::Internal(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    async fn try_sample(&self, inbound: &HeaderMap) -> Result<RandomSample, SampleError> {
        match &self.strategy {
            Strategy::Internal(rng) => Ok(draw_internal(rng)),
            Strategy::Command(cmd) => run_command(cmd).await,
            Strategy::Rest {
                url,
                client,
                identity,
            } => fetch_remote(client, url, identity, inbound).await,
        }
    }
}

impl Sampler for RandomSource {
    async fn sample(&self, inbound: &HeaderMap) -> RandomSample {
        match self.try_sample(inbound).await {
            Ok(sample) => sample,
            Err(err) => {
                match &self.target {
                    RandomTarget::Command(cmd) => log::error!("Command '{cmd}' {err}."),
                    RandomTarget::Rest(url) => {
                        log::error!("Failed to receive random number at randomsvc '{url}': {err}.")
                    }
                    RandomTarget::Internal => log::error!("Internal generator failed: {err}."),
                }
                RandomSample::failed()
            }
        }
    }
}

fn clock_seeded_rng() -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    StdRng::seed_from_u64(nanos as u64)
}

fn draw_internal(rng: &Mutex<StdRng>) -> RandomSample {
    // A poisoned lock still holds a usable generator.
    let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    RandomSample {
        value: rng.random_range(0..SAMPLE_DOMAIN),
        source_name: INTERNAL_NAME.to_string(),
        source_version: INTERNAL_VERSION.to_string(),
    }
}

async fn run_command(cmd: &str) -> Result<RandomSample, SampleError> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(SampleError::Spawn)?;

    if !output.status.success() {
        return Err(SampleError::ExitStatus(output.status));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        return Err(SampleError::Stderr(stderr.trim_end().to_string()));
    }

    let (value, server) = parse_report(&String::from_utf8_lossy(&output.stdout))?;
    Ok(RandomSample {
        value,
        source_name: server,
        source_version: NO_VERSION.to_string(),
    })
}

/// Find the first `... received <value> from <server>` line in `stdout`.
pub fn parse_report(stdout: &str) -> Result<(i64, String), SampleError> {
    let caps = stdout
        .lines()
        .find_map(|line| REPORT_LINE.captures(line))
        .ok_or(SampleError::NoMatch)?;

    let value = &caps["value"];
    let value = value
        .parse::<i64>()
        .map_err(|_| SampleError::BadInteger(value.to_string()))?;
    Ok((value, caps["server"].to_string()))
}

/// Payload served by a remote random number service.
#[derive(Debug, Deserialize)]
struct RemoteNumber {
    value: i64,
    name: String,
    version: String,
}

async fn fetch_remote(
    client: &reqwest::Client,
    url: &Url,
    identity: &Identity,
    inbound: &HeaderMap,
) -> Result<RandomSample, SampleError> {
    let response = client
        .get(url.clone())
        .headers(identity.headers(Some(inbound)))
        .send()
        .await
        .map_err(SampleError::Transport)?;

    let status = response.status();
    let body = response.text().await.map_err(SampleError::Transport)?;
    if status != StatusCode::OK {
        return Err(SampleError::Status { status, body });
    }

    let number: RemoteNumber = serde_json::from_str(&body).map_err(SampleError::Decode)?;
    Ok(RandomSample {
        value: number.value,
        source_name: number.name,
        source_version: number.version,
    })
}
