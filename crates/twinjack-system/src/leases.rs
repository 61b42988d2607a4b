//! Client MAC attribution from the dnsmasq lease table.

use std::net::IpAddr;
use std::path::PathBuf;

use tracing::debug;

use twinjack_core::runner::ClientResolver;

/// Resolves a client IP back to its MAC by reading the lease file written
/// by the session's DHCP service. Lease lines look like:
/// `1719922810 aa:bb:cc:dd:ee:ff 10.0.0.23 android-phone 01:aa:bb:cc:dd:ee:ff`
pub struct LeaseClientResolver {
    lease_path: PathBuf,
}

impl LeaseClientResolver {
    pub fn new(lease_path: impl Into<PathBuf>) -> Self {
        Self {
            lease_path: lease_path.into(),
        }
    }
}

impl ClientResolver for LeaseClientResolver {
    fn mac_for_ip(&self, ip: IpAddr) -> Option<String> {
        let contents = std::fs::read_to_string(&self.lease_path).ok()?;
        let found = find_mac(&contents, &ip.to_string());
        if found.is_none() {
            debug!(ip = %ip, path = %self.lease_path.display(), "no lease entry for client");
        }
        found
    }
}

fn find_mac(leases: &str, ip: &str) -> Option<String> {
    for line in leases.lines() {
        let mut parts = line.split_whitespace();
        let _expiry = parts.next()?;
        let mac = parts.next()?;
        let lease_ip = parts.next()?;
        if lease_ip == ip {
            return Some(mac.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = "\
1719922810 aa:bb:cc:dd:ee:ff 10.0.0.23 android-phone 01:aa:bb:cc:dd:ee:ff
1719922899 11:22:33:44:55:66 10.0.0.24 * *
";

    #[test]
    fn resolves_known_clients() {
        assert_eq!(
            find_mac(LEASES, "10.0.0.23"),
            Some("aa:bb:cc:dd:ee:ff".to_string())
        );
        assert_eq!(
            find_mac(LEASES, "10.0.0.24"),
            Some("11:22:33:44:55:66".to_string())
        );
        assert_eq!(find_mac(LEASES, "10.0.0.99"), None);
    }

    #[test]
    fn resolver_handles_missing_lease_file() {
        let resolver = LeaseClientResolver::new("/nonexistent/leases");
        assert_eq!(resolver.mac_for_ip("10.0.0.23".parse().unwrap()), None);
    }

    #[test]
    fn resolver_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnsmasq-wlan0.leases");
        std::fs::write(&path, LEASES).unwrap();

        let resolver = LeaseClientResolver::new(&path);
        assert_eq!(
            resolver.mac_for_ip("10.0.0.24".parse().unwrap()),
            Some("11:22:33:44:55:66".to_string())
        );
    }
}
