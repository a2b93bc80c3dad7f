// src/registry/mod.rs
//! Connection registry: single owner of exchange client handles and
//! per-connection health state.
//!
//! Every other component reads and updates connection health exclusively
//! through this registry, so the read path and the trading path always see
//! the same degradation picture.

use crate::config::settings::Config;
use crate::error::{ExchangeError, FailureWeight, Result};
use crate::exchange::{Credentials, ExchangeClient, ExchangeClientFactory};
use crate::utils::ConnectionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Health view of one connection, as served to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl ConnectionHealth {
    fn healthy() -> Self {
        Self {
            degraded: false,
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
        }
    }
}

/// Registry-owned state for one identity.
///
/// Invariant: `degraded` is true iff `consecutive_failures` reached the
/// configured threshold since the last success.
struct ConnectionState {
    client: Option<Arc<dyn ExchangeClient>>,
    consecutive_failures: u32,
    degraded: bool,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            client: None,
            consecutive_failures: 0,
            degraded: false,
            last_success: None,
            last_error: None,
        }
    }

    fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            degraded: self.degraded,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            last_success: self.last_success,
        }
    }
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionState>,
    factory: Arc<dyn ExchangeClientFactory>,
    max_consecutive_failures: u32,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn ExchangeClientFactory>, config: &Config) -> Self {
        Self {
            connections: DashMap::new(),
            factory,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }

    /// Returns the stored client for an identity, building it on first use.
    ///
    /// Idempotent: an existing handle is never replaced unless
    /// [`invalidate`](Self::invalidate) dropped it first. Only credential
    /// and configuration problems propagate to the caller.
    pub fn get_or_create(
        &self,
        id: &ConnectionId,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeClient>> {
        if let Some(state) = self.connections.get(id) {
            if let Some(client) = &state.client {
                return Ok(Arc::clone(client));
            }
        }

        // Build outside the map entry so the shard lock stays short
        let client = self.factory.create(id, credentials)?;
        let mut entry = self
            .connections
            .entry(id.clone())
            .or_insert_with(ConnectionState::new);
        match &entry.client {
            // Lost a race against another task; keep the first stored handle
            Some(existing) => Ok(Arc::clone(existing)),
            None => {
                entry.client = Some(Arc::clone(&client));
                info!("🔌 Created exchange client for {}", id);
                Ok(client)
            }
        }
    }

    /// One success fully heals the connection.
    pub fn record_success(&self, id: &ConnectionId) {
        let mut entry = self
            .connections
            .entry(id.clone())
            .or_insert_with(ConnectionState::new);
        if entry.degraded {
            info!(
                "✅ Connection {} recovered after {} consecutive failures",
                id, entry.consecutive_failures
            );
        }
        entry.consecutive_failures = 0;
        entry.degraded = false;
        entry.last_success = Some(Utc::now());
    }

    /// Applies the error's counting weight and returns the updated health
    /// so callers can check degradation without a second lookup.
    pub fn record_failure(&self, id: &ConnectionId, error: &ExchangeError) -> ConnectionHealth {
        let classification = error.classify();
        let mut entry = self
            .connections
            .entry(id.clone())
            .or_insert_with(ConnectionState::new);
        entry.last_error = Some(error.to_string());

        match classification.weight {
            FailureWeight::Standard => {
                entry.consecutive_failures += 1;
                if !entry.degraded
                    && entry.consecutive_failures >= self.max_consecutive_failures
                {
                    entry.degraded = true;
                    warn!(
                        "⚠️ Connection {} degraded after {} consecutive failures ({})",
                        id, entry.consecutive_failures, classification.reason
                    );
                } else {
                    debug!(
                        "Connection {} failure {}/{}: {}",
                        id, entry.consecutive_failures, self.max_consecutive_failures, error
                    );
                }
            }
            FailureWeight::Light => {
                debug!(
                    "Connection {} rate limited, failure counter stays at {}",
                    id, entry.consecutive_failures
                );
            }
            FailureWeight::None => {
                warn!("Connection {}: {}", id, classification.reason);
            }
        }
        entry.health()
    }

    pub fn is_degraded(&self, id: &ConnectionId) -> bool {
        self.connections.get(id).map(|s| s.degraded).unwrap_or(false)
    }

    /// Drops the stored client handle so the next `get_or_create` rebuilds
    /// it. Health counters reset with it; after a credential change the old
    /// failure history no longer applies.
    pub fn invalidate(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.client = None;
            entry.consecutive_failures = 0;
            entry.degraded = false;
            entry.last_error = None;
            info!("Invalidated exchange client for {}", id);
        }
    }

    pub fn health(&self, id: &ConnectionId) -> ConnectionHealth {
        self.connections
            .get(id)
            .map(|s| s.health())
            .unwrap_or_else(ConnectionHealth::healthy)
    }

    /// Identities the registry has seen so far.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Identities currently flagged as degraded.
    pub fn degraded_connections(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().degraded)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
