//! Headers attached to every request this service makes.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

/// Header carrying the deployment environment between services.
pub const ENVIRONMENT_HEADER: &str = "x-environment";

/// Inbound headers copied onto calls made on behalf of a request.
pub const FORWARDED_HEADERS: &[&str] = &[
    ENVIRONMENT_HEADER,
    "x-request-id",
    "x-correlation-id",
    "traceparent",
];

/// Who this service claims to be on outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub version: String,
    /// Configured environment, sent when the inbound request carries none.
    pub environment: Option<String>,
}

impl Identity {
    /// Standard headers, plus whatever `inbound` carries from the allow-list.
    pub fn headers(&self, inbound: Option<&HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(agent) = HeaderValue::from_str(&format!("{}/{}", self.name, self.version)) {
            headers.insert(USER_AGENT, agent);
        }
        if let Some(value) = self
            .environment
            .as_deref()
            .and_then(|env| HeaderValue::from_str(env).ok())
        {
            headers.insert(HeaderName::from_static(ENVIRONMENT_HEADER), value);
        }

        if let Some(inbound) = inbound {
            for name in FORWARDED_HEADERS {
                if let Some(value) = inbound.get(*name) {
                    headers.insert(HeaderName::from_static(*name), value.clone());
                }
            }
        }
        headers
    }
}
