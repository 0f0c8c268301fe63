use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::Registry;

/// Registry identifier of the runtime mode.
pub const MODE_STORE: &str = "_MODE";

/// Development vs production. Only consulted to decide how chatty
/// diagnostics are; the bus and command layer ignore it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

/// Mode stored in `registry`, production when never set.
pub fn get_mode(registry: &Registry) -> RuntimeMode {
    registry
        .get::<RuntimeMode>(MODE_STORE)
        .map(|mode| *mode)
        .unwrap_or_default()
}

pub fn set_mode(registry: &Registry, mode: RuntimeMode) {
    debug!(%mode, "Runtime mode set");
    registry.set(MODE_STORE, mode);
}
