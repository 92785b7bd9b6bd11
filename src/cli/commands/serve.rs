//! API server command.

use console::style;

use crate::config::Settings;
use crate::registry::JobRegistry;

/// Start the submission API.
pub async fn cmd_serve(
    mut settings: Settings,
    registry: JobRegistry,
    bind: Option<String>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        let (host, port) = parse_bind_address(&bind, settings.api_port)?;
        settings.api_host = host;
        settings.api_port = port;
    }

    println!(
        "{} Starting context-crawler API at http://{}:{}",
        style("→").cyan(),
        settings.api_host,
        settings.api_port
    );
    if registry.is_empty() {
        println!(
            "  {} no job registry found, only ad-hoc submissions will work",
            style("!").yellow()
        );
    } else {
        println!(
            "  {} {} job(s) registered",
            style("✓").green(),
            registry.len()
        );
    }
    println!("  Press Ctrl+C to stop");

    crate::server::serve(&settings, registry).await
}

/// Parse a bind address that can be:
/// - Just a port: "3000" -> 127.0.0.1:3000
/// - Just a host: "0.0.0.0" -> 0.0.0.0:<default>
/// - Host and port: "0.0.0.0:3000"
fn parse_bind_address(bind: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    Ok((bind.to_string(), default_port))
}
