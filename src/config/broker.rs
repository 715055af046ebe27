//! Broker address parsing.

use anyhow::{Context, Result};

/// Default MQTT port when the address carries none.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Parse a broker address into `(host, port)`.
///
/// Supports formats:
/// - `host:port` - explicit port
/// - `host` - defaults to port 1883
///
/// Returns an error for an empty host or an unparseable port.
pub fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        anyhow::bail!("Broker address cannot be empty");
    }

    match addr.rsplit_once(':') {
        Some((host, port_str)) => {
            if host.is_empty() {
                anyhow::bail!("Broker address missing host: {addr}");
            }
            let port: u16 = port_str
                .parse()
                .with_context(|| format!("Invalid broker port: {port_str}"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}
