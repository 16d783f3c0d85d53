use std::net::{IpAddr, Ipv4Addr};

use roster_sdk::RosterError;

/// First non-loopback IPv4 address among the host's network interfaces.
///
/// # Errors
/// `RosterError::InterfaceLookup` if interfaces cannot be enumerated,
/// `RosterError::LocalIpNotFound` if none carries a usable IPv4 address.
pub fn local_ip() -> Result<Ipv4Addr, RosterError> {
    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| RosterError::InterfaceLookup(e.to_string()))?;

    let ip = first_non_loopback_v4(interfaces.iter().map(|(_, ip)| *ip))
        .ok_or(RosterError::LocalIpNotFound)?;
    tracing::debug!(ip = %ip, "detected local IPv4 address");
    Ok(ip)
}

fn first_non_loopback_v4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|ip| match ip {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
        _ => None,
    })
}
