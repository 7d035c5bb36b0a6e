//! Store - named entry point over a connector's collections.

use crate::collection::Collection;
use crate::connector::Connector;
use std::sync::Arc;

/// A named view over a connector's registered collections.
///
/// Embedded engines have no connection lifecycle, so [`open`](Store::open)
/// and [`close`](Store::close) do nothing. They stay callable so callers can
/// bracket their work unconditionally.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    connector: Connector,
}

impl Store {
    pub fn new(name: impl Into<String>, connector: &Connector) -> Self {
        Self {
            name: name.into(),
            connector: connector.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Look up a registered collection by name.
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.connector.collection(name)
    }

    pub async fn open(&self) {
        tracing::debug!(store = %self.name, "Store opened");
    }

    pub async fn close(&self) {
        tracing::debug!(store = %self.name, "Store closed");
    }
}
