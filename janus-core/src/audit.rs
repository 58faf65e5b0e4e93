use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::Task;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pass,
    Warn,
    Fail,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub status: AuditStatus,
    pub reason: String,
    /// 0 (harmless) to 10 (destructive).
    pub risk_level: u8,
}

impl AuditVerdict {
    pub const MAX_RISK: u8 = 10;

    pub fn pass(reason: impl Into<String>, risk_level: u8) -> Self {
        Self::new(AuditStatus::Pass, reason, risk_level)
    }

    pub fn warn(reason: impl Into<String>, risk_level: u8) -> Self {
        Self::new(AuditStatus::Warn, reason, risk_level)
    }

    pub fn fail(reason: impl Into<String>, risk_level: u8) -> Self {
        Self::new(AuditStatus::Fail, reason, risk_level)
    }

    fn new(status: AuditStatus, reason: impl Into<String>, risk_level: u8) -> Self {
        Self {
            status,
            reason: reason.into(),
            risk_level: risk_level.min(Self::MAX_RISK),
        }
    }
}

/// Security gate consulted once per task before its first execution.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, skill_id: &str, parameters: &Map<String, Value>, task: &Task)
    -> AuditVerdict;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_is_capped() {
        let verdict = AuditVerdict::fail("rm -rf", 42);
        assert_eq!(verdict.risk_level, 10);
        assert_eq!(verdict.status, AuditStatus::Fail);
    }
}
