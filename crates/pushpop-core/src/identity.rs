//! Turning a discovered service into something we can download from.
//!
//! A service record carries a name, a port, a set of addresses and TXT
//! metadata. The receiver needs one address it can actually reach and the
//! user name the sender advertised.

use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::error::{Error, Result};

/// TXT key holding the advertised user name.
pub const USER_TXT_KEY: &str = "user";

/// A file offered on the network, resolved to a reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOffer {
    /// Name of the offered file
    pub display_name: String,
    /// User name the sender advertised
    pub advertised_user: String,
    /// Sender address on a network this machine is attached to
    pub address: IpAddr,
    /// Sender HTTP port
    pub port: u16,
}

impl TransferOffer {
    /// Build an offer from the parts of a resolved service record.
    pub fn resolve<'a>(
        display_name: &str,
        txt: impl IntoIterator<Item = (&'a str, &'a str)>,
        candidates: &[IpAddr],
        port: u16,
        networks: &[LocalNetwork],
    ) -> Result<Self> {
        Ok(Self {
            display_name: display_name.to_string(),
            advertised_user: advertised_user(txt)?,
            address: reachable_address(candidates, networks)?,
            port,
        })
    }

    /// Base URL of the sender, e.g. `http://192.168.1.4:43121/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/", SocketAddr::new(self.address, self.port))
    }
}

/// Extract the `user` entry from TXT metadata.
///
/// The value must be non-empty and made of letters, digits, `_`, `-`
/// and `.`.
pub fn advertised_user<'a>(txt: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<String> {
    txt.into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(USER_TXT_KEY))
        .map(|(_, value)| value.trim())
        .filter(|value| is_valid_user(value))
        .map(str::to_string)
        .ok_or(Error::MissingMetadata(USER_TXT_KEY))
}

/// Whether `name` is acceptable as an advertised user name.
#[must_use]
pub fn is_valid_user(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// One address/netmask pair of a local interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNetwork {
    /// Interface address
    pub addr: IpAddr,
    /// Interface netmask
    pub netmask: IpAddr,
}

impl LocalNetwork {
    /// Whether `ip` lies in this network.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, self.netmask, ip) {
            (IpAddr::V4(addr), IpAddr::V4(mask), IpAddr::V4(ip)) => {
                let mask = u32::from(mask);
                u32::from(addr) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(addr), IpAddr::V6(mask), IpAddr::V6(ip)) => {
                let mask = u128::from(mask);
                u128::from(addr) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Networks of every local interface, loopback included.
pub fn local_networks() -> Result<Vec<LocalNetwork>> {
    let interfaces = if_addrs::get_if_addrs()?;
    Ok(interfaces
        .into_iter()
        .map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => LocalNetwork {
                addr: IpAddr::V4(v4.ip),
                netmask: IpAddr::V4(v4.netmask),
            },
            if_addrs::IfAddr::V6(v6) => LocalNetwork {
                addr: IpAddr::V6(v6.ip),
                netmask: IpAddr::V6(v6.netmask),
            },
        })
        .collect())
}

/// First candidate that lies inside one of `networks`.
///
/// IPv6 link-local candidates are skipped: they cannot be dialed without
/// a scope id.
pub fn reachable_address(candidates: &[IpAddr], networks: &[LocalNetwork]) -> Result<IpAddr> {
    candidates
        .iter()
        .copied()
        .filter(|ip| !is_unicast_link_local_v6(*ip))
        .find(|ip| networks.iter().any(|net| net.contains(*ip)))
        .ok_or_else(|| Error::Unreachable(candidates.to_vec()))
}

fn is_unicast_link_local_v6(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80)
}
