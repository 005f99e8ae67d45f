//! MAC address generation and normalization.

use rand::RngCore;

/// Generates a random MAC address with the locally-administered bit set
/// and the multicast bit cleared.
#[must_use]
pub fn generate_rand_mac() -> String {
    let mut buf = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut buf);

    // Locally administered, unicast.
    buf[0] = (buf[0] | 0x02) & 0xfe;

    buf.iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalizes a MAC address to the form the ARP table and BPF filters use:
/// lowercase hex with leading zeros stripped from each octet.
#[must_use]
pub fn normalize_mac_address(mac: &str) -> String {
    mac.to_ascii_lowercase()
        .split(':')
        .map(|part| {
            if part.len() == 2 && part.starts_with('0') {
                part[1..].to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_rand_mac_shape() {
        let mac = generate_rand_mac();
        let parts: Vec<&str> = mac.split(':').collect();
        assert_eq!(parts.len(), 6);
        for part in &parts {
            assert_eq!(part.len(), 2);
            assert!(u8::from_str_radix(part, 16).is_ok());
        }
    }

    #[test]
    fn test_generate_rand_mac_locally_administered_unicast() {
        for _ in 0..32 {
            let mac = generate_rand_mac();
            let first = u8::from_str_radix(&mac[..2], 16).unwrap();
            assert_eq!(first & 0x02, 0x02, "locally administered bit must be set");
            assert_eq!(first & 0x01, 0x00, "multicast bit must be cleared");
        }
    }

    #[test]
    fn test_normalize_mac_address() {
        assert_eq!(
            normalize_mac_address("0A:1B:2C:03:04:5E"),
            "a:1b:2c:3:4:5e"
        );
        assert_eq!(normalize_mac_address("00:00:00:00:00:00"), "0:0:0:0:0:0");
        assert_eq!(
            normalize_mac_address("fe:dc:ba:98:76:54"),
            "fe:dc:ba:98:76:54"
        );
    }
}
