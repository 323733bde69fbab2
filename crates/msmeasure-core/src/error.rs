//! Error types for configuration, sampling and registration.
//!
//! Only [`ConfigError`] is ever returned to a caller that is expected to stop.
//! [`SampleError`] and [`RegistrationError`] describe failures that are logged
//! and absorbed by the random source and the registration loop respectively.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Startup configuration could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Device kind is neither `thermometer` nor `hygrometer`.
    #[error("wrong device '{0}', use 'thermometer' or 'hygrometer'")]
    InvalidDeviceKind(String),

    /// No device kind was supplied by any configuration layer.
    #[error("no device type configured, use 'thermometer' or 'hygrometer'")]
    MissingDeviceKind,

    /// The random service target looks like a URL but does not parse.
    #[error("random svc has bad url '{url}': {source}")]
    InvalidRandomSvc {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The upstream registry URL does not parse.
    #[error("upstream has bad url '{url}': {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A port value from the environment is not a valid `u16`.
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// The configuration file could not be opened.
    #[error("failed to open configuration file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected keys.
    #[error("failed to parse configuration file '{}': {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a random sample could not be obtained.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    /// The shell could not be started or waited on.
    #[error("failed with '{0}'")]
    Spawn(#[source] std::io::Error),

    /// The command exited unsuccessfully.
    #[error("exited with {0}")]
    ExitStatus(std::process::ExitStatus),

    /// The command wrote to standard error.
    #[error("reported error: '{0}'")]
    Stderr(String),

    /// No output line carried a `received <n> from <server>` report.
    #[error("printed no 'received <value> from <server>' line")]
    NoMatch,

    /// The matched value does not fit into an integer.
    #[error("failed to convert '{0}' to int")]
    BadInteger(String),

    /// The request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The random service answered with something other than 200.
    #[error("replied with status '{status}' and message '{body}'")]
    Status { status: StatusCode, body: String },

    /// The body was not a `{ value, name, version }` document.
    #[error("returned an undecodable body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Why an announcement to the upstream registry did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The request could not be sent.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The response body could not be read.
    #[error("failed to read reply: {0}")]
    ReadBody(#[source] reqwest::Error),

    /// The upstream answered with a status that is not an acknowledgement.
    #[error("replied with status '{status}' and message '{body}'")]
    Status { status: StatusCode, body: String },
}
