//! Condition machinery for status aggregation
//!
//! Every managed resource reports an ordered list of conditions; the
//! control plane keeps one rolled-up condition per service plus a single
//! top-level `Ready` condition. Mirroring picks the highest-priority
//! condition (severity-ranked, False-before-Unknown-before-True) so the
//! aggregate surfaces the most urgent problem without log access.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Type of the top-level readiness condition
pub const READY: &str = "Ready";

/// Machine-readable condition reasons
pub mod reason {
    /// Condition has been initialized and is awaiting its first evaluation
    pub const INIT: &str = "Init";
    /// The underlying resource was requested and is still converging
    pub const REQUESTED: &str = "Requested";
    /// An error occurred while reconciling the underlying resource
    pub const ERROR: &str = "Error";
    /// The underlying resource reached its desired state
    pub const READY: &str = "Ready";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How urgent a non-True condition is when ranking for mirroring
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// The condition blocks the resource from functioning
    Error,
    /// The resource functions degraded
    Warning,
    /// Expected transient state (e.g., still rolling out)
    Info,
    /// No severity, used for True/Unknown conditions
    #[default]
    None,
}

/// A severity-ranked status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, IdentityReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Severity of the condition when status is False
    #[serde(default)]
    pub severity: ConditionSeverity,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            severity,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// A True condition
    pub fn true_(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            type_,
            ConditionStatus::True,
            reason::READY,
            ConditionSeverity::None,
            message,
        )
    }

    /// A False condition with the given reason and severity
    pub fn false_(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self::new(type_, ConditionStatus::False, reason, severity, message)
    }

    /// An Unknown condition
    pub fn unknown(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            type_,
            ConditionStatus::Unknown,
            reason,
            ConditionSeverity::None,
            message,
        )
    }

    /// Rank used when choosing which condition to mirror. Higher ranks
    /// surface first: False/Error > False/Warning > False/Info >
    /// Unknown > True.
    fn priority(&self) -> u8 {
        match (self.status, self.severity) {
            (ConditionStatus::False, ConditionSeverity::Error) => 5,
            (ConditionStatus::False, ConditionSeverity::Warning) => 4,
            (ConditionStatus::False, _) => 3,
            (ConditionStatus::Unknown, _) => 2,
            (ConditionStatus::True, _) => 1,
        }
    }
}

/// An ordered list of conditions with at most one entry per type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Set a condition, replacing any existing condition of the same type.
    ///
    /// The previous transition time is kept when the status does not
    /// change so no-op reconcile passes do not churn the status.
    pub fn set(&mut self, mut condition: Condition) {
        if let Some(existing) = self.get(&condition.type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.0.retain(|c| c.type_ != condition.type_);
        self.0.push(condition);
        self.0.sort_by(|a, b| a.type_.cmp(&b.type_));
    }

    /// Mark a condition of the given type True
    pub fn mark_true(&mut self, type_: impl Into<String>, message: impl Into<String>) {
        self.set(Condition::true_(type_, message));
    }

    /// Remove the condition of the given type, if present
    pub fn remove(&mut self, type_: &str) {
        self.0.retain(|c| c.type_ != type_);
    }

    /// Get the condition of the given type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition of the given type exists and is True
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// The highest-priority condition, excluding the top-level Ready
    /// condition (which is itself derived from the others)
    pub fn highest_priority(&self) -> Option<&Condition> {
        self.0
            .iter()
            .filter(|c| c.type_ != READY)
            .max_by_key(|c| c.priority())
    }

    /// Mirror the highest-priority condition under a new type.
    ///
    /// Returns None when the list is empty (the caller synthesizes a
    /// placeholder in that case).
    pub fn mirror(&self, target: impl Into<String>) -> Option<Condition> {
        self.highest_priority().map(|c| {
            let mut mirrored = c.clone();
            mirrored.type_ = target.into();
            mirrored
        })
    }

    /// Whether every condition other than the top-level Ready is True
    pub fn all_sub_conditions_true(&self) -> bool {
        self.0
            .iter()
            .filter(|c| c.type_ != READY)
            .all(|c| c.status == ConditionStatus::True)
    }

    /// Restore transition times from a saved copy for conditions whose
    /// status did not change during the pass
    pub fn restore_transition_times(&mut self, saved: &Conditions) {
        for condition in &mut self.0 {
            if let Some(previous) = saved.get(&condition.type_) {
                if previous.status == condition.status {
                    condition.last_transition_time = previous.last_transition_time;
                }
            }
        }
    }

    /// Iterate over the conditions in type order
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
