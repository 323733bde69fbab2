//! HTTP routes for the ms-measure device simulator.
//!
//! - `GET /measure`: take a measurement (always 200, even when the random
//!   source degraded to its sentinel value)
//! - `GET /device`: describe the simulated device
//! - `GET /status`: uptime and registration state

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
};
use serde::Serialize;

use msmeasure_core::outbound::ENVIRONMENT_HEADER;
use msmeasure_core::{DeviceReading, MeasurementService, RegistrationStatus, Settings};

/// Shared server state.
struct AppState {
    service: MeasurementService,
    settings: Settings,
}

/// Fields common to every reply.
#[derive(Serialize)]
struct Envelope {
    status: u16,
    message: String,
    name: String,
    version: String,
    host: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeasureResponse {
    #[serde(flatten)]
    envelope: Envelope,
    address: String,
    #[serde(flatten)]
    reading: DeviceReading,
    rnr_svc_name: String,
    rnr_svc_version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceResponse {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(rename = "type")]
    kind: String,
    address: String,
    unit: &'static str,
    minimum: String,
    maximum: String,
    precision: String,
    /// Last measured reading, absent until the first measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<DeviceReading>,
    url_device: String,
    url_measure: String,
    url_status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(flatten)]
    envelope: Envelope,
    uptime_seconds: f64,
    registration: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream: Option<String>,
    random_svc: String,
    measurements: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_served_seconds_ago: Option<f64>,
}

impl AppState {
    fn envelope(&self, status: StatusCode, message: String) -> Envelope {
        Envelope {
            status: status.as_u16(),
            message,
            name: self.settings.name.clone(),
            version: self.settings.version.clone(),
            host: self.settings.hostname.clone(),
        }
    }

    /// `'<version>' in '<env>' @ '<address>'.`
    fn message_header(&self, headers: &HeaderMap) -> String {
        let environment = headers
            .get(ENVIRONMENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        let version = &self.settings.version;
        let address = &self.settings.device.address;
        match environment {
            Some(env) => format!("'{version}' in '{env}' @ '{address}'."),
            None => format!("'{version}' @ '{address}'."),
        }
    }
}

async fn handle_measure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<MeasureResponse>) {
    let measurement = state.service.measure(&headers).await;
    let message = format!(
        "{} reported value '{}' with rnrsrc '{}@{}'.",
        state.message_header(&headers),
        measurement.reading.formatted_value,
        measurement.source_name,
        measurement.source_version
    );
    log::info!("{message}");

    (
        StatusCode::OK,
        Json(MeasureResponse {
            envelope: state.envelope(StatusCode::OK, message),
            address: state.settings.device.address.clone(),
            reading: measurement.reading,
            rnr_svc_name: measurement.source_name,
            rnr_svc_version: measurement.source_version,
        }),
    )
}

async fn handle_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<DeviceResponse> {
    let message = format!("{} reported details of device.", state.message_header(&headers));
    log::info!("{message}");

    let device = state.service.device();
    Json(DeviceResponse {
        envelope: state.envelope(StatusCode::OK, message),
        kind: device.kind.to_string(),
        address: device.address.clone(),
        unit: device.kind.unit(),
        minimum: device.format_units(device.minimum()),
        maximum: device.format_units(device.maximum()),
        precision: device.format_units(device.precision_divisor),
        current: state.service.current_reading(),
        url_device: state.settings.endpoint("device"),
        url_measure: state.settings.endpoint("measure"),
        url_status: state.settings.endpoint("status"),
    })
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<StatusResponse> {
    let message = format!("{} reported status.", state.message_header(&headers));
    let registration = state.service.registration();
    let now = Instant::now();

    Json(StatusResponse {
        envelope: state.envelope(StatusCode::OK, message),
        uptime_seconds: now
            .saturating_duration_since(registration.started_at())
            .as_secs_f64(),
        registration: registration.status(),
        upstream: state.settings.upstream.as_ref().map(|u| u.to_string()),
        random_svc: state.settings.random_target.to_string(),
        measurements: state.service.served(),
        last_served_seconds_ago: registration.has_served().then(|| {
            now.saturating_duration_since(registration.last_served_at())
                .as_secs_f64()
        }),
    })
}

/// Build the axum router.
pub fn build_router(service: MeasurementService, settings: Settings) -> Router {
    let state = Arc::new(AppState { service, settings });

    Router::new()
        .route("/measure", get(handle_measure))
        .route("/device", get(handle_device))
        .route("/status", get(handle_status))
        .with_state(state)
}

/// Run the HTTP server until it fails.
pub async fn run_server(service: MeasurementService, settings: Settings) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let app = build_router(service, settings);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on {addr}.");
    axum::serve(listener, app).await
}
