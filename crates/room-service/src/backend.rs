//! Startup choice between the shared and the local-only backend pair.

use crate::fanout::{FanoutBus, LocalFanoutBus, RedisFanoutBus};
use crate::store::{redis_store, MemoryRoomStore, RedisRoomStore, RoomStore, StoreBackend};

use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The store and bus a process runs with for its whole lifetime.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn RoomStore>,
    pub bus: Arc<dyn FanoutBus>,
}

impl Backends {
    /// Memory store with a loopback bus.
    #[must_use]
    pub fn local() -> Self {
        Self {
            store: Arc::new(MemoryRoomStore::new()),
            bus: Arc::new(LocalFanoutBus::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> StoreBackend {
        self.store.backend()
    }
}

/// Connect to Redis if configured, otherwise (or on failure) fall back to
/// local-only mode. Never fails startup.
pub async fn select_backends(
    redis_url: Option<&SecretString>,
    ttl: Duration,
    connect_timeout: Duration,
) -> Backends {
    let Some(url) = redis_url else {
        warn!(
            target: "room.backend",
            "REDIS_URL not set, running in local-only mode (state is not shared across processes)"
        );
        return Backends::local();
    };

    match redis_store::connect(url.expose_secret(), connect_timeout).await {
        Ok((client, manager)) => {
            info!(target: "room.backend", ttl_seconds = ttl.as_secs(), "Connected to Redis");
            Backends {
                store: Arc::new(RedisRoomStore::new(manager.clone(), ttl)),
                bus: Arc::new(RedisFanoutBus::new(client, manager)),
            }
        }
        Err(e) => {
            warn!(
                target: "room.backend",
                error = %e,
                "Redis unreachable at startup, degrading to local-only mode for this process"
            );
            Backends::local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_url_selects_local() {
        let backends =
            select_backends(None, Duration::from_secs(60), Duration::from_millis(100)).await;
        assert_eq!(backends.kind(), StoreBackend::Memory);
    }

    #[tokio::test]
    async fn test_bad_url_degrades_to_local() {
        let url = SecretString::from("definitely not a url");
        let backends =
            select_backends(Some(&url), Duration::from_secs(60), Duration::from_millis(100)).await;
        assert_eq!(backends.kind(), StoreBackend::Memory);
    }
}
