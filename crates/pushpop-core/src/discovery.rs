//! mDNS/DNS-SD announcement and discovery of offered files.
//!
//! ## Service Type
//!
//! PushPop registers as `_pushpop._tcp.local.`. The instance name is the
//! offered file name and a TXT record `user=<name>` carries the sender's
//! user name, which receivers match against.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::identity::{self, LocalNetwork, TransferOffer, USER_TXT_KEY};
use crate::SERVICE_TYPE;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn mdns_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Discovery(format!("{what}: {e}"))
}

/// Host name in the `.local.` form mDNS expects.
fn local_hostname() -> String {
    let raw = hostname::get().map_or_else(
        |_| "localhost".to_string(),
        |h| h.to_string_lossy().to_string(),
    );

    if raw.ends_with(".local.") {
        raw
    } else if raw.to_lowercase().ends_with(".local") {
        format!("{raw}.")
    } else {
        format!("{raw}.local.")
    }
}

/// Offer resolved from a service record, if it is usable from here.
fn offer_from_service_info(info: &ServiceInfo, networks: &[LocalNetwork]) -> Option<TransferOffer> {
    let fullname = info.get_fullname();
    let display_name = fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|n| n.strip_suffix('.'))
        .unwrap_or(fullname);

    let properties = info.get_properties();
    let txt = properties.iter().map(|p| (p.key(), p.val_str()));
    let candidates: Vec<IpAddr> = info.get_addresses().iter().copied().collect();

    match TransferOffer::resolve(display_name, txt, &candidates, info.get_port(), networks) {
        Ok(offer) => Some(offer),
        Err(e) => {
            tracing::debug!(service = %fullname, error = %e, "Skipping service");
            None
        }
    }
}

fn shutdown_daemon(daemon: &ServiceDaemon, role: &str) {
    match daemon.shutdown() {
        Ok(receiver) => match receiver.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(status) => tracing::debug!(?status, role, "mDNS shutdown completed"),
            Err(flume::RecvTimeoutError::Timeout) => {
                tracing::debug!(role, "mDNS shutdown timed out");
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                tracing::debug!(role, "mDNS shutdown channel disconnected");
            }
        },
        Err(e) => tracing::debug!(role, "mDNS shutdown failed: {e}"),
    }
}

/// Advertises one offered file.
pub struct Announcer {
    /// The mDNS daemon (wrapped in Option to support Drop)
    daemon: Option<ServiceDaemon>,
    /// Full name of the registered service
    registered: Arc<Mutex<Option<String>>>,
}

impl Announcer {
    /// Create a new announcer.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| mdns_error("mDNS daemon error", e))?;

        Ok(Self {
            daemon: Some(daemon),
            registered: Arc::new(Mutex::new(None)),
        })
    }

    /// Announce `name` on `port` on behalf of `user`.
    ///
    /// Addresses of every interface are published and kept current.
    pub async fn register(&self, name: &str, port: u16, user: &str) -> Result<()> {
        if !identity::is_valid_user(user) {
            return Err(Error::Discovery(format!(
                "user name '{user}' may only contain letters, digits, '_', '-' and '.'"
            )));
        }

        let txt = [(USER_TXT_KEY, user)];
        let service_info = ServiceInfo::new(SERVICE_TYPE, name, &local_hostname(), (), port, &txt[..])
            .map_err(|e| mdns_error("Failed to create mDNS service info", e))?
            .enable_addr_auto();
        let fullname = service_info.get_fullname().to_string();

        self.daemon()?
            .register(service_info)
            .map_err(|e| mdns_error("Failed to register mDNS service", e))?;

        *self.registered.lock().await = Some(fullname.clone());

        tracing::info!(service = %fullname, port, user, "Announced file");
        Ok(())
    }

    /// Withdraw the announcement, if any.
    pub async fn unregister(&self) -> Result<()> {
        let Some(fullname) = self.registered.lock().await.take() else {
            return Ok(());
        };

        let receiver = self
            .daemon()?
            .unregister(&fullname)
            .map_err(|e| mdns_error("Failed to unregister mDNS service", e))?;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, receiver.recv_async()).await {
            Ok(Ok(status)) => tracing::debug!(service = %fullname, ?status, "mDNS unregister completed"),
            Ok(Err(e)) => tracing::debug!(service = %fullname, "mDNS unregister channel closed: {e}"),
            Err(_) => tracing::debug!(service = %fullname, "mDNS unregister timed out"),
        }

        tracing::info!(service = %fullname, "Withdrew announcement");
        Ok(())
    }

    fn daemon(&self) -> Result<&ServiceDaemon> {
        self.daemon
            .as_ref()
            .ok_or_else(|| Error::Discovery("mDNS daemon already shutdown".to_string()))
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            shutdown_daemon(&daemon, "announcer");
        }
    }
}

/// Browses for offered files.
pub struct Browser {
    /// The mDNS daemon (wrapped in Option to support Drop)
    daemon: Option<ServiceDaemon>,
    /// Receiver for service events
    receiver: flume::Receiver<ServiceEvent>,
}

impl Browser {
    /// Start browsing.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| mdns_error("mDNS daemon error", e))?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| mdns_error("Failed to browse mDNS services", e))?;

        Ok(Self {
            daemon: Some(daemon),
            receiver,
        })
    }

    /// Wait for a reachable offer from `user`.
    ///
    /// Services without a valid user entry or without a reachable address
    /// are skipped.
    pub async fn find(&self, user: &str, timeout: Duration) -> Result<TransferOffer> {
        let networks = identity::local_networks()?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::OfferNotFound(user.to_string()));
            }

            match tokio::time::timeout(remaining, self.receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let Some(offer) = offer_from_service_info(&info, &networks) else {
                        continue;
                    };
                    if offer.advertised_user == user {
                        tracing::info!(
                            file = %offer.display_name,
                            user = %offer.advertised_user,
                            addr = %offer.address,
                            port = offer.port,
                            "Found offer"
                        );
                        return Ok(offer);
                    }
                    tracing::debug!(
                        file = %offer.display_name,
                        user = %offer.advertised_user,
                        "Ignoring offer from another user"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => return Err(Error::OfferNotFound(user.to_string())),
            }
        }
    }

    /// Collect every reachable offer seen within `duration`.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<TransferOffer>> {
        let networks = identity::local_networks()?;
        let mut discovered = HashMap::new();
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    if let Some(offer) = offer_from_service_info(&info, &networks) {
                        discovered.insert(info.get_fullname().to_string(), offer);
                    }
                }
                Ok(Ok(ServiceEvent::ServiceRemoved(_, fullname))) => {
                    discovered.remove(&fullname);
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }

        let mut offers: Vec<_> = discovered.into_values().collect();
        offers.sort_by(|a, b| {
            (&a.advertised_user, &a.display_name).cmp(&(&b.advertised_user, &b.display_name))
        });
        Ok(offers)
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
                tracing::debug!("Failed to stop mDNS browse during drop: {e}");
            }
            shutdown_daemon(&daemon, "browser");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_format() {
        assert!(SERVICE_TYPE.ends_with(".local."));
        assert!(SERVICE_TYPE.starts_with("_pushpop._tcp"));
    }

    #[test]
    fn test_local_hostname_suffix() {
        assert!(local_hostname().ends_with(".local."));
    }

    #[test]
    fn test_offer_from_service_info() {
        let networks = identity::local_networks().unwrap();
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "holiday.tar",
            "sender.local.",
            "127.0.0.1",
            4242,
            &[(USER_TXT_KEY, "alice")][..],
        )
        .unwrap();

        let offer = offer_from_service_info(&info, &networks).unwrap();
        assert_eq!(offer.display_name, "holiday.tar");
        assert_eq!(offer.advertised_user, "alice");
        assert_eq!(offer.port, 4242);
        assert_eq!(offer.base_url(), "http://127.0.0.1:4242/");
    }

    #[test]
    fn test_service_without_user_is_skipped() {
        let networks = identity::local_networks().unwrap();
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "holiday.tar",
            "sender.local.",
            "127.0.0.1",
            4242,
            &[("other", "x")][..],
        )
        .unwrap();

        assert!(offer_from_service_info(&info, &networks).is_none());
    }
}
