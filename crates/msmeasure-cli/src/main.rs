//! CLI for ms-measure: a simulated thermometer or hygrometer.

mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use msmeasure_core::{ConfigLayer, Settings};

/// Flags take precedence over the configuration file, which takes precedence
/// over `MS_*` environment variables.
#[derive(Parser)]
#[command(name = "ms-measure")]
#[command(about = "ms-measure: a simulated thermometer or hygrometer")]
#[command(version = msmeasure_core::VERSION)]
struct Cli {
    /// Service name reported in replies and the User-Agent
    #[arg(long)]
    name: Option<String>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Hostname used to build this service's public URLs
    #[arg(long)]
    hostname: Option<String>,

    /// Environment name sent as X-Environment on outbound calls
    #[arg(long)]
    environment: Option<String>,

    /// URL for the upstream service.
    #[arg(long)]
    upstream: Option<String>,

    /// URL for the random number service, a command starting with '/' or '.',
    /// or empty for the internal generator.
    #[arg(long)]
    randomsvc: Option<String>,

    /// Type of device ('thermometer' or 'hygrometer').
    #[arg(long = "type")]
    device_type: Option<String>,

    /// Address of the device.
    #[arg(long)]
    address: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            name: self.name,
            host: self.host,
            port: self.port,
            hostname: self.hostname,
            environment: self.environment,
            upstream: self.upstream,
            randomsvc: self.randomsvc,
            device_type: self.device_type,
            address: self.address,
            config: self.config,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = match ConfigLayer::from_process_env()
        .and_then(|env| Settings::resolve(cli.into_layer(), env))
    {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {err}!");
            return ExitCode::from(2);
        }
    };

    match serve::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Server failed: {err}.");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_layer() {
        let cli = Cli::parse_from([
            "ms-measure",
            "--type",
            "thermometer",
            "--address",
            "t-1",
            "--port",
            "9000",
            "--randomsvc",
            "./rnd.sh",
        ]);
        let layer = cli.into_layer();
        assert_eq!(layer.device_type.as_deref(), Some("thermometer"));
        assert_eq!(layer.address.as_deref(), Some("t-1"));
        assert_eq!(layer.port, Some(9000));
        assert_eq!(layer.randomsvc.as_deref(), Some("./rnd.sh"));
        assert_eq!(layer.upstream, None);
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::parse_from(["ms-measure", "--type", "hygrometer"]);
        let env = ConfigLayer {
            device_type: Some("thermometer".to_string()),
            address: Some("from-env".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(cli.into_layer(), env).unwrap();
        assert_eq!(settings.device.kind, msmeasure_core::DeviceKind::Hygrometer);
        assert_eq!(settings.device.address, "from-env");
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
