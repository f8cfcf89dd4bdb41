//! Nimbus control-plane operator
//!
//! Drives a set of dependent platform services toward the state declared
//! in a [`nimbus_common::crd::NimbusControlPlane`] through level-triggered
//! reconciliation: one generic reconcile skeleton parameterized by a
//! per-service descriptor registry, a shared credential lifecycle engine,
//! a shared endpoint/TLS exposure sequencer, admission-time dependency
//! validation, and version-rollout gating over the aggregated status.

use std::time::Duration;

pub mod controller;
pub mod controller_runner;
pub mod credentials;
pub mod dependencies;
pub mod exposure;
pub mod reconcile;
pub mod registry;
pub mod rollout;
pub mod store;
pub mod webhook;

/// Structured retry hint returned by the engine functions.
///
/// "Not converged yet" is never an error: callers get an explicit delay
/// to honor instead of busy-polling, while hard errors bubble up and hit
/// the runtime's default backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// The step converged; the pass may continue
    No,
    /// Re-enter the pass after a fixed delay
    After(Duration),
}

impl Requeue {
    /// Retry after the given number of seconds
    pub fn after_secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// Whether a retry was requested
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::After(_))
    }

    /// The requested delay, if any
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::No => None,
            Self::After(d) => Some(*d),
        }
    }
}
