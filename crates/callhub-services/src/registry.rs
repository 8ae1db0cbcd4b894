//! Live duplex-channel connections per user
//!
//! The registry owns one outbound queue sender per connected device. A
//! device's socket task drains its queue; the registry never blocks on a
//! slow socket. Failing to deliver (user offline, socket gone) is not an
//! error, just a routing signal for the caller.

use callhub_core::models::ServerEvent;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One connected device
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    pub user_id: String,
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
    outbound: UnboundedSender<String>,
}

impl DeviceConnection {
    fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

#[derive(Default)]
struct Connections {
    by_user: HashMap<String, HashMap<Uuid, DeviceConnection>>,
    owner_of: HashMap<Uuid, String>,
}

impl Connections {
    fn remove(&mut self, connection_id: Uuid) -> Option<DeviceConnection> {
        let user_id = self.owner_of.remove(&connection_id)?;
        let devices = self.by_user.get_mut(&user_id)?;
        let removed = devices.remove(&connection_id);
        if devices.is_empty() {
            self.by_user.remove(&user_id);
        }
        removed
    }
}

/// Map of user id to that user's live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Connections>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device connection for `user_id`
    pub fn register(&self, user_id: &str, connection_id: Uuid, outbound: UnboundedSender<String>) {
        let connection = DeviceConnection {
            user_id: user_id.to_string(),
            connection_id,
            connected_at: Utc::now(),
            outbound,
        };

        let mut inner = self.inner.write();
        inner.owner_of.insert(connection_id, user_id.to_string());
        let devices = inner.by_user.entry(user_id.to_string()).or_default();
        devices.insert(connection_id, connection);

        info!(
            user_id,
            connection_id = %connection_id,
            devices = devices.len(),
            "Device connected"
        );
    }

    /// Drop a connection; unknown ids are ignored
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let removed = self.inner.write().remove(connection_id);
        if let Some(connection) = &removed {
            let connected_secs = (Utc::now() - connection.connected_at).num_seconds();
            info!(
                user_id = %connection.user_id,
                connection_id = %connection_id,
                connected_secs,
                "Device disconnected"
            );
        }
        removed.is_some()
    }

    /// Whether the user has at least one open connection
    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .is_some_and(|devices| devices.values().any(DeviceConnection::is_open))
    }

    /// Send `event` to every device of `user_id`.
    ///
    /// Returns `true` if at least one device accepted it. Connections whose
    /// socket task is gone are pruned.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(user_id, event = event.event_name(), error = %e, "Failed to serialize event");
                return false;
            }
        };

        let mut delivered = 0usize;
        let mut dead = Vec::new();
        {
            let inner = self.inner.read();
            let Some(devices) = inner.by_user.get(user_id) else {
                debug!(user_id, event = event.event_name(), "User offline; event not delivered");
                return false;
            };
            for (connection_id, device) in devices {
                if device.outbound.send(payload.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*connection_id);
                }
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.write();
            for connection_id in dead {
                inner.remove(connection_id);
            }
        }

        debug!(user_id, event = event.event_name(), delivered, "Event fanned out");
        delivered > 0
    }

    /// Number of users with at least one connection
    pub fn online_users(&self) -> usize {
        self.inner.read().by_user.len()
    }

    /// Total number of device connections
    pub fn connection_count(&self) -> usize {
        self.inner.read().owner_of.len()
    }

    /// Number of devices connected for `user_id`
    pub fn device_count(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .map_or(0, HashMap::len)
    }
}
