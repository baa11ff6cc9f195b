//! Best-effort local address discovery.
//!
//! Reported in the REGISTER payload for operator display only; nothing in
//! the tunnel depends on these addresses being present or correct.

use std::net::UdpSocket;
use tracing::debug;

/// The address the default route would use for outbound traffic.
///
/// Connecting a UDP socket performs a routing decision without sending any
/// packet; the chosen local address is the machine's primary interface.
pub fn local_ips() -> Vec<String> {
    let mut ips = Vec::new();
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(addr) = socket.local_addr() {
                if !addr.ip().is_loopback() && !addr.ip().is_unspecified() {
                    ips.push(addr.ip().to_string());
                }
            }
        }
    }
    debug!(?ips, "discovered local addresses");
    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_never_panics_and_skips_loopback() {
        for ip in local_ips() {
            assert!(!ip.starts_with("127."));
            assert_ne!(ip, "0.0.0.0");
        }
    }
}
