use std::sync::Arc;

use msmeasure_core::{
    MeasurementService, RandomSource, RegistrationAgent, RegistrationState, Settings,
};

/// Start the registration agent and serve HTTP until the server fails.
pub fn run(settings: Settings) -> std::io::Result<()> {
    let base = settings.base_url();

    println!("🌡  {} v{}", settings.name, settings.version);
    println!("   {base}");
    println!(
        "   {} '{}' fed by {}",
        settings.device.kind, settings.device.address, settings.random_target
    );
    match &settings.upstream {
        Some(upstream) => println!("   registering at {upstream}"),
        None => println!("   no upstream, registration disabled"),
    }
    println!();
    println!("   Endpoints:");
    println!("     GET /measure   Take a measurement");
    println!("     GET /device    Device details");
    println!("     GET /status    Uptime and registration state");
    println!();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let client = reqwest::Client::new();
        let registration = Arc::new(RegistrationState::new());

        let agent = RegistrationAgent::new(
            settings.upstream.clone(),
            settings.endpoint("device"),
            client.clone(),
            settings.identity(),
            Arc::clone(&registration),
        );
        tokio::spawn(agent.run());

        let source = RandomSource::new(
            settings.random_target.clone(),
            client,
            settings.identity(),
        );
        let service = MeasurementService::new(settings.device.clone(), source, registration);
        msmeasure_server::run_server(service, settings).await
    })
}
