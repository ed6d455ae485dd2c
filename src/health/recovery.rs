use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a source can return to service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Eligible now
    Immediate,
    /// Eligible after `retry_after`
    Delayed,
    /// Needs an explicit release
    Manual,
    /// Blocked until `retry_after`
    Disabled,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
            Self::Manual => "manual",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub source_id: String,
    pub action: RecoveryAction,
    pub retry_after: Option<DateTime<Utc>>,
    pub reason: String,
}

impl RecoveryPlan {
    pub fn immediate(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            action: RecoveryAction::Immediate,
            retry_after: None,
            reason: "healthy".to_string(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self.action, RecoveryAction::Immediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_plan() {
        let plan = RecoveryPlan::immediate("a");
        assert!(!plan.is_blocked());
        assert_eq!(plan.action.to_string(), "immediate");
        assert_eq!(serde_json::to_string(&RecoveryAction::Manual).unwrap(), "\"manual\"");
    }
}
