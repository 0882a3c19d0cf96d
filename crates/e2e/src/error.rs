//! Error types for the persistence harness

use thiserror::Error;

use crate::discovery::DiscoveryReport;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Application not ready after {0} attempts")]
    AppNotReady(usize),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright bridge error: {0}")]
    Bridge(String),

    #[error("Login did not leave {url} for {email} within {timeout_ms} ms")]
    LoginStuck {
        email: String,
        url: String,
        timeout_ms: u64,
    },

    #[error("Discovery failed:\n{0}")]
    Discovery(DiscoveryReport),

    #[error("Missing seed data: {0}")]
    MissingSeedData(String),

    #[error("Action failed: {method} {url} returned {status}: {body}")]
    ActionFailed {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Endpoint contract violated: {0}")]
    ContractViolation(String),

    #[error("Persistence mismatch for {subject}:\n{details}")]
    PersistenceMismatch { subject: String, details: String },

    #[error("Audit record missing: {entity_type} {entity_id} with status {status}")]
    AuditMissing {
        entity_type: String,
        entity_id: String,
        status: String,
    },

    #[error("Could not verify: {0}")]
    Unverified(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("No selector matched for {chain} (tried: {tried})")]
    SelectorNotFound { chain: String, tried: String },

    #[error("Timeout waiting for {what} after {timeout_ms} ms ({context})")]
    Timeout {
        what: String,
        timeout_ms: u64,
        context: String,
    },

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data layer error: {0}")]
    Data(#[from] persistcheck_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// Precondition failures that mean "this environment has nothing to test"
    /// rather than "the application is broken".
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            HarnessError::MissingSeedData(_) | HarnessError::Unverified(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    /// The data layer in use cannot answer this kind of query
    pub fn is_unsupported(&self) -> bool {
        matches!(self, HarnessError::Data(e) if e.is_unsupported())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_classification() {
        assert!(HarnessError::MissingSeedData("no events".into()).is_skip());
        assert!(HarnessError::Unverified("audit table".into()).is_skip());
        assert!(!HarnessError::AuditMissing {
            entity_type: "ParticipationHistory".into(),
            entity_id: "p1".into(),
            status: "Cancelled".into(),
        }
        .is_skip());
    }
}
