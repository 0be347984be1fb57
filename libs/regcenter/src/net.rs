//! Local address detection for advertising an instance.

use std::net::{IpAddr, Ipv4Addr};

/// IP address of the interface used for the default outbound route.
///
/// This is the address peers on the same network would use to reach this
/// process, not the public external IP.
///
/// # Errors
/// Returns an error if no suitable interface can be determined.
pub fn local_ip() -> Result<IpAddr, local_ip_address::Error> {
    let ip = local_ip_address::local_ip()?;
    tracing::debug!(ip = %ip, "Detected local IP address");
    Ok(ip)
}

/// Address to advertise: `configured` when non-blank, otherwise the detected
/// local IP, otherwise loopback.
#[must_use]
pub fn advertise_address(configured: Option<&str>) -> String {
    if let Some(address) = configured.map(str::trim).filter(|a| !a.is_empty()) {
        return address.to_owned();
    }
    match local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to detect local IP address, advertising loopback");
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}
