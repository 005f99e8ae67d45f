//! Guest IP discovery: bridged packet capture and ARP-table fallback.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{NetError, Result};
use vzpod_error::CommonError;

/// Minimum frame length carrying an IPv4 header after Ethernet.
const MIN_IPV4_FRAME_LEN: usize = 14 + 20;

/// EtherType for IPv4.
const ETHERTYPE_IPV4: u16 = 0x0800;

/// Capture read timeout; bounds how long a cancelled capture lingers.
const CAPTURE_POLL_MS: i32 = 1000;

/// Captures the source IP of the first IPv4 packet sent from `mac_addr` on
/// the bridged host interface.
///
/// Installs the BPF filter
/// `ether src <mac> and ip and not src host 0.0.0.0` and blocks (on a
/// blocking task) until a matching packet arrives or the deadline passes.
///
/// # Errors
///
/// Returns a capture error when the device cannot be opened or the filter
/// rejected, and `Timeout` when no packet arrives within `timeout`.
pub async fn capture_ip_on_interface(
    interface: &str,
    mac_addr: &str,
    timeout: Duration,
) -> Result<String> {
    let interface = interface.to_string();
    let filter = format!("ether src {mac_addr} and ip and not src host 0.0.0.0");

    let handle = tokio::task::spawn_blocking(move || capture_blocking(&interface, &filter, timeout));
    handle
        .await
        .map_err(|err| NetError::Common(CommonError::internal(format!("capture task: {err}"))))?
}

fn capture_blocking(interface: &str, filter: &str, timeout: Duration) -> Result<String> {
    let mut capture = pcap::Capture::from_device(interface)
        .map_err(|err| NetError::Capture(format!("failed to open device: {err}")))?
        .promisc(true)
        .snaplen(1600)
        .timeout(CAPTURE_POLL_MS)
        .open()
        .map_err(|err| NetError::Capture(format!("failed to open capture: {err}")))?;

    capture
        .filter(filter, true)
        .map_err(|err| NetError::Capture(format!("failed to set BPF filter: {err}")))?;

    let deadline = std::time::Instant::now() + timeout;
    loop {
        match capture.next_packet() {
            Ok(packet) => {
                if let Some(src) = ipv4_source(packet.data) {
                    return Ok(src.to_string());
                }
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(err) => return Err(NetError::Capture(err.to_string())),
        }

        if std::time::Instant::now() >= deadline {
            return Err(CommonError::timeout("IP address capture".to_string()).into());
        }
    }
}

/// Extracts the IPv4 source address from an Ethernet frame.
fn ipv4_source(frame: &[u8]) -> Option<Ipv4Addr> {
    if frame.len() < MIN_IPV4_FRAME_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    Some(Ipv4Addr::new(frame[26], frame[27], frame[28], frame[29]))
}

/// Scans the host ARP table for the entry matching `mac_addr`, retrying
/// once per second until found or cancelled by the caller's timeout.
///
/// Runs `arp -an` and extracts the parenthesized address from the matching
/// line (`? (192.168.64.3) at a:b:c:d:e:f on en0 …`).
///
/// # Errors
///
/// Returns an I/O error when the `arp` command cannot be executed.
pub async fn retrieve_ip_from_arp_table(mac_addr: &str) -> Result<String> {
    let needle = mac_addr.to_ascii_lowercase();
    loop {
        let output = tokio::process::Command::new("arp")
            .arg("-an")
            .output()
            .await?;

        let table = String::from_utf8_lossy(&output.stdout);
        if let Some(ip) = find_arp_entry(&table, &needle) {
            return Ok(ip);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Finds the IP for a MAC in `arp -an` output.
fn find_arp_entry(table: &str, mac_lower: &str) -> Option<String> {
    for line in table.lines() {
        if !line.to_ascii_lowercase().contains(mac_lower) {
            continue;
        }
        let mut fields = line.split_whitespace();
        let _question = fields.next();
        if let Some(field) = fields.next() {
            return Some(field.trim_matches(|c| c == '(' || c == ')').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_source_parses_frame() {
        let mut frame = vec![0u8; 64];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[26..30].copy_from_slice(&[192, 168, 64, 3]);
        assert_eq!(ipv4_source(&frame), Some(Ipv4Addr::new(192, 168, 64, 3)));
    }

    #[test]
    fn test_ipv4_source_rejects_non_ip() {
        let mut frame = vec![0u8; 64];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        assert_eq!(ipv4_source(&frame), None);
        assert_eq!(ipv4_source(&[0u8; 10]), None);
    }

    #[test]
    fn test_find_arp_entry() {
        let table = "\
? (192.168.64.1) at 3c:22:fb:aa:bb:cc on en0 ifscope [ethernet]
? (192.168.64.3) at a:1b:2c:3:4:5e on en0 ifscope [ethernet]
? (224.0.0.251) at 1:0:5e:0:0:fb on en0 ifscope permanent [ethernet]";

        assert_eq!(
            find_arp_entry(table, "a:1b:2c:3:4:5e"),
            Some("192.168.64.3".to_string())
        );
        assert_eq!(find_arp_entry(table, "de:ad:be:ef:0:1"), None);
    }

    #[test]
    fn test_find_arp_entry_is_case_insensitive() {
        let table = "? (10.0.0.7) at A:1B:2C:3:4:5E on en1 ifscope [ethernet]";
        assert_eq!(
            find_arp_entry(table, "a:1b:2c:3:4:5e"),
            Some("10.0.0.7".to_string())
        );
    }
}
