//! Per-user-session credential store, namespaced per connector and role.
//!
//! A connector acting as both storage and hosting keeps two independent
//! credential entries in the same session, keyed by
//! `"<connector_id>-<connector_type>"`. The session lives exactly as long
//! as the surrounding user session and is never persisted to disk.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ConnectorResult};

/// The two orthogonal capability roles a connector can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Storage,
    Hosting,
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorType::Storage => write!(f, "storage"),
            ConnectorType::Hosting => write!(f, "hosting"),
        }
    }
}

/// Typed map of connector session payloads.
///
/// Payloads are stored as JSON values and decoded on access, so each
/// connector defines its own credential struct without the session module
/// knowing about it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorSession {
    entries: HashMap<String, serde_json::Value>,
}

impl ConnectorSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(connector_id: &str, connector_type: ConnectorType) -> String {
        format!("{connector_id}-{connector_type}")
    }

    /// Decode the payload stored for `(connector_id, connector_type)`, if any.
    pub fn get<T: DeserializeOwned>(
        &self,
        connector_id: &str,
        connector_type: ConnectorType,
    ) -> ConnectorResult<Option<T>> {
        match self.entries.get(&Self::key(connector_id, connector_type)) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    ConnectorError::Session(format!(
                        "failed to decode session data for {connector_id}-{connector_type}: {e}"
                    ))
                }),
            None => Ok(None),
        }
    }

    /// Store a payload for `(connector_id, connector_type)`, replacing any
    /// previous one.
    pub fn set<T: Serialize>(
        &mut self,
        connector_id: &str,
        connector_type: ConnectorType,
        value: &T,
    ) -> ConnectorResult<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            ConnectorError::Session(format!(
                "failed to encode session data for {connector_id}-{connector_type}: {e}"
            ))
        })?;
        self.entries
            .insert(Self::key(connector_id, connector_type), value);
        Ok(())
    }

    /// Drop the payload for `(connector_id, connector_type)`. A no-op when
    /// nothing is stored, which is what makes `logout` idempotent.
    pub fn remove(&mut self, connector_id: &str, connector_type: ConnectorType) {
        self.entries
            .remove(&Self::key(connector_id, connector_type));
    }

    pub fn contains(&self, connector_id: &str, connector_type: ConnectorType) -> bool {
        self.entries
            .contains_key(&Self::key(connector_id, connector_type))
    }
}
