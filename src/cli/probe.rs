// src/cli/probe.rs — One-shot `login` and `snapshot` commands

use std::sync::Arc;

use crate::infra::config::Config;
use crate::infra::logger::redact;
use crate::portal::{EnergyFlowReader, SessionManager};

/// Log in and print what the handshake discovered.
pub async fn run_login(config: &Config) -> anyhow::Result<()> {
    let session = SessionManager::new(config.portal_credentials()?)?;
    session.login().await?;

    let info = session.info().await;
    println!("fusionbridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Data host:  {}", info.data_host.as_deref().unwrap_or("-"));
    println!(
        "  Session:    {}",
        info.session_cookie.as_deref().map(redact).unwrap_or_else(|| "-".into())
    );
    match &info.station {
        Some(station) => {
            println!("  Station:    {}", station.station_id);
            if let Some(capacity) = station.battery_capacity {
                println!("  Battery:    {capacity} kWh");
            }
        }
        None => println!("  Station:    (none)"),
    }
    println!("  Dongle:     {}", info.dongle_dn.as_deref().unwrap_or("(none)"));
    Ok(())
}

/// Read one snapshot and print it as JSON.
pub async fn run_snapshot(config: &Config) -> anyhow::Result<()> {
    let session = Arc::new(SessionManager::new(config.portal_credentials()?)?);
    let reader = EnergyFlowReader::new(session, config.flow_mapping.clone());

    let snapshot = reader.get_energy_flow().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
