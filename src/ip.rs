//! IP address helpers for DNSBL-style reverse names.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

/// Reverse IPv4 octets for DNSBL queries: `a.b.c.d` -> `d.c.b.a`.
pub fn reverse_ipv4(addr: Ipv4Addr) -> String {
    let octets = addr.octets();
    format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0])
}

/// Reverse IPv6 for DNSBL queries: the 32 nibbles of the fully expanded
/// address, dot-joined in reverse order.
pub fn reverse_ipv6(addr: Ipv6Addr) -> String {
    let mut nibbles = Vec::with_capacity(32);
    for segment in addr.segments() {
        for shift in [12u16, 8, 4, 0] {
            nibbles.push(format!("{:x}", (segment >> shift) & 0xF));
        }
    }
    nibbles.reverse();
    nibbles.join(".")
}

pub fn reverse_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(addr) => reverse_ipv4(*addr),
        IpAddr::V6(addr) => reverse_ipv6(*addr),
    }
}

/// Canonical text form used for cache keys and durable rows: IPv4 as dotted
/// decimal, IPv6 fully expanded lowercase. Two spellings of one address
/// canonicalise identically.
pub fn canonical(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(addr) => addr.to_string(),
        IpAddr::V6(addr) => {
            let segments = addr.segments();
            let parts: Vec<String> = segments.iter().map(|s| format!("{:04x}", s)).collect();
            parts.join(":")
        }
    }
}

/// Parse the reversed-IP prefix of `name` under `suffix`. Returns the client
/// IP in canonical order, or None when the prefix is not a well-formed
/// reversed IPv4 (4 octets) or IPv6 (32 nibbles) form.
pub fn parse_reverse(name: &str, suffix: &str) -> Option<IpAddr> {
    let name = name.trim_end_matches('.').to_lowercase();
    let suffix = suffix.trim_end_matches('.').to_lowercase();

    if name.len() <= suffix.len() + 1 || !name.ends_with(&suffix) {
        return None;
    }
    let prefix = &name[..name.len() - suffix.len()];
    if !prefix.ends_with('.') {
        return None;
    }
    let prefix = &prefix[..prefix.len() - 1];

    let parts: Vec<&str> = prefix.split('.').collect();
    match parts.len() {
        4 => {
            let mut octets = [0u8; 4];
            for (i, part) in parts.iter().enumerate() {
                if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                octets[i] = part.parse::<u8>().ok()?;
            }
            // Wire order is reversed; flip back to address order.
            Some(IpAddr::V4(Ipv4Addr::new(
                octets[3], octets[2], octets[1], octets[0],
            )))
        }
        32 => {
            let mut nibbles = [0u8; 32];
            for (i, part) in parts.iter().enumerate() {
                if part.len() != 1 {
                    return None;
                }
                nibbles[i] = u8::from_str_radix(part, 16).ok()?;
            }
            nibbles.reverse();

            let mut segments = [0u16; 8];
            for (i, chunk) in nibbles.chunks(4).enumerate() {
                segments[i] = ((chunk[0] as u16) << 12)
                    | ((chunk[1] as u16) << 8)
                    | ((chunk[2] as u16) << 4)
                    | chunk[3] as u16;
            }
            Some(IpAddr::V6(Ipv6Addr::from(segments)))
        }
        _ => None,
    }
}

/// Version-aware CIDR containment; differing address families never match.
pub fn cidr_contains(net: &IpNet, ip: &IpAddr) -> bool {
    match (net, ip) {
        (IpNet::V4(net), IpAddr::V4(addr)) => net.contains(addr),
        (IpNet::V6(net), IpAddr::V6(addr)) => net.contains(addr),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_ipv4() {
        assert_eq!(reverse_ipv4(Ipv4Addr::new(127, 0, 0, 2)), "2.0.0.127");
        assert_eq!(reverse_ipv4(Ipv4Addr::new(1, 2, 3, 4)), "4.3.2.1");
    }

    #[test]
    fn test_reverse_ipv6() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let reversed = reverse_ipv6(addr);
        assert!(reversed.starts_with("1.0.0.0."));
        assert!(reversed.ends_with("8.b.d.0.1.0.0.2"));
        assert_eq!(reversed.split('.').count(), 32);
    }

    #[test]
    fn test_parse_reverse_roundtrip_ipv4() {
        for addr in ["127.0.0.2", "8.8.8.8", "192.0.2.255"] {
            let ip: IpAddr = addr.parse().unwrap();
            let name = format!("{}.zen.spamhaus.org", reverse_ip(&ip));
            assert_eq!(parse_reverse(&name, "zen.spamhaus.org"), Some(ip));
        }
    }

    #[test]
    fn test_parse_reverse_roundtrip_ipv6() {
        let ip: IpAddr = "2001:db8::42".parse().unwrap();
        let name = format!("{}.bl.example.org", reverse_ip(&ip));
        assert_eq!(parse_reverse(&name, "bl.example.org"), Some(ip));
    }

    #[test]
    fn test_parse_reverse_rejects_bad_prefixes() {
        assert_eq!(parse_reverse("zen.spamhaus.org", "zen.spamhaus.org"), None);
        assert_eq!(parse_reverse("2.0.127.zen.spamhaus.org", "zen.spamhaus.org"), None);
        assert_eq!(parse_reverse("2.0.0.256.zen.spamhaus.org", "zen.spamhaus.org"), None);
        assert_eq!(parse_reverse("a.b.c.d.zen.spamhaus.org", "zen.spamhaus.org"), None);
        assert_eq!(parse_reverse("2.0.0.127.other.example", "zen.spamhaus.org"), None);
    }

    #[test]
    fn test_canonical_collapses_spellings() {
        let a: IpAddr = "2001:db8:0:0:0:0:0:1".parse().unwrap();
        let b: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(canonical(&a), canonical(&b));
        assert_eq!(canonical(&a), "2001:0db8:0000:0000:0000:0000:0000:0001");

        let v4: IpAddr = "10.1.4.5".parse().unwrap();
        assert_eq!(canonical(&v4), "10.1.4.5");
    }

    #[test]
    fn test_cidr_contains() {
        let net: IpNet = "10.0.0.0/8".parse().unwrap();
        assert!(cidr_contains(&net, &"10.1.4.5".parse().unwrap()));
        assert!(!cidr_contains(&net, &"11.0.0.1".parse().unwrap()));
        // Version mismatch is never a match.
        assert!(!cidr_contains(&net, &"::ffff:10.0.0.1".parse().unwrap()));

        let net6: IpNet = "2001:db8::/32".parse().unwrap();
        assert!(cidr_contains(&net6, &"2001:db8::1".parse().unwrap()));
        assert!(!cidr_contains(&net6, &"2001:db9::1".parse().unwrap()));
    }
}
