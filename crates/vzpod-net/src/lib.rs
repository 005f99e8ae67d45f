//! Host networking helpers.
//!
//! Two concerns live here: generating the locally-administered MAC address
//! a VM boots with, and discovering the IP address the guest acquired,
//! either by capturing the first packet it sends on a bridged host
//! interface or by scanning the host ARP table in NAT mode.

mod error;
mod ip;
mod mac;

pub use error::{NetError, Result};
pub use ip::{capture_ip_on_interface, retrieve_ip_from_arp_table};
pub use mac::{generate_rand_mac, normalize_mac_address};
