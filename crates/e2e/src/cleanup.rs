//! Test-owned users and their guaranteed removal
//!
//! Every user the harness creates carries the configured email prefix, so
//! a suite-level sweep can remove stragglers from aborted runs without
//! touching seeded accounts.

use futures::FutureExt;
use parking_lot::Mutex;
use persistcheck_common::{Credentials, TestUserSpec};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::datalayer::DataLayer;
use crate::error::{HarnessError, HarnessResult};

/// Handle to a user created for one test
#[derive(Debug, Clone, PartialEq)]
pub struct TestUser {
    pub id: String,
    pub spec: TestUserSpec,
}

impl TestUser {
    pub fn email(&self) -> &str {
        &self.spec.email
    }

    pub fn credentials(&self) -> Credentials {
        self.spec.credentials()
    }
}

pub struct CleanupManager {
    data: Arc<dyn DataLayer>,
    prefix: String,
    created: Mutex<Vec<TestUser>>,
}

impl CleanupManager {
    pub fn new(data: Arc<dyn DataLayer>, prefix: &str) -> Self {
        Self {
            data,
            prefix: prefix.to_string(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Create a uniquely named member account
    pub async fn create_test_user(&self, base: &str) -> HarnessResult<TestUser> {
        self.create_test_user_from(TestUserSpec::unique(&self.prefix, base))
            .await
    }

    pub async fn create_test_user_from(&self, spec: TestUserSpec) -> HarnessResult<TestUser> {
        if !spec.email.starts_with(&self.prefix) {
            return Err(HarnessError::Config(format!(
                "test user {} does not carry the cleanup prefix '{}'",
                spec.email, self.prefix
            )));
        }
        let id = self.data.create_user(&spec).await?;
        let user = TestUser { id, spec };
        self.created.lock().push(user.clone());
        info!("Created test user {} ({})", user.email(), user.id);
        Ok(user)
    }

    /// Delete one test user; `false` if it was already gone
    pub async fn cleanup_test_user(&self, user_id: &str) -> HarnessResult<bool> {
        let deleted = self.data.delete_user_by_id(user_id).await?;
        self.created.lock().retain(|u| u.id != user_id);
        debug!("Cleaned up test user {} (deleted: {})", user_id, deleted);
        Ok(deleted)
    }

    /// Run `body` with a fresh user and delete the user afterwards, whether
    /// `body` returns, fails or panics.
    pub async fn with_test_user<T, F, Fut>(&self, base: &str, body: F) -> HarnessResult<T>
    where
        F: FnOnce(TestUser) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let user = self.create_test_user(base).await?;
        let id = user.id.clone();

        let outcome = AssertUnwindSafe(body(user)).catch_unwind().await;
        let cleanup = self.cleanup_test_user(&id).await;

        match outcome {
            Ok(result) => match (result, cleanup) {
                (Ok(value), Ok(_)) => Ok(value),
                (Ok(_), Err(e)) => Err(e),
                (Err(e), cleanup) => {
                    if let Err(ce) = cleanup {
                        warn!("Cleanup of {} failed after test error: {}", id, ce);
                    }
                    Err(e)
                }
            },
            Err(panic) => {
                if let Err(ce) = cleanup {
                    warn!("Cleanup of {} failed after panic: {}", id, ce);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Ids of users created and not yet cleaned up
    pub fn outstanding(&self) -> Vec<String> {
        self.created.lock().iter().map(|u| u.id.clone()).collect()
    }

    /// Suite teardown: remove tracked users, then anything else carrying the
    /// prefix. Returns the number of users removed.
    pub async fn global_cleanup(&self) -> HarnessResult<usize> {
        let tracked: Vec<TestUser> = std::mem::take(&mut *self.created.lock());
        let mut removed = 0;
        for user in &tracked {
            match self.data.delete_user_by_id(&user.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Could not delete test user {}: {}", user.email(), e),
            }
        }

        match self.data.delete_users_with_email_prefix(&self.prefix).await {
            Ok(n) => removed += n,
            Err(e) if e.is_unsupported() => {
                debug!("{} data layer cannot sweep by prefix", self.data.name());
            }
            Err(e) => return Err(e),
        }

        info!("Global cleanup removed {} test user(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalayer::SqliteDataLayer;
    use persistcheck_common::Database;

    fn manager() -> (CleanupManager, Database) {
        let db = Database::open_memory().unwrap();
        let layer: Arc<dyn DataLayer> = Arc::new(SqliteDataLayer::new(db.clone()));
        (CleanupManager::new(layer, "e2e-"), db)
    }

    #[tokio::test]
    async fn test_user_is_removed_after_failing_body() {
        let (cleanup, db) = manager();
        let mut email = String::new();
        let result: HarnessResult<()> = cleanup
            .with_test_user("failing", |user| {
                email = user.email().to_string();
                async move { Err(HarnessError::AssertionFailed("boom".into())) }
            })
            .await;
        assert!(matches!(result, Err(HarnessError::AssertionFailed(_))));
        assert!(db.user_id_for_email(&email).is_err());
        assert!(cleanup.outstanding().is_empty());
    }

    #[tokio::test]
    async fn test_global_cleanup_sweeps_stragglers_but_not_seeded_users() {
        let (cleanup, db) = manager();
        cleanup.create_test_user("tracked").await.unwrap();
        db.insert_user(&TestUserSpec::unique("e2e-", "straggler")).unwrap();
        let seeded = TestUserSpec {
            email: "admin@witchcityrope.com".into(),
            password: "Test123!".into(),
            scene_name: "Admin".into(),
            role: persistcheck_common::Role::Admin,
        };
        db.insert_user(&seeded).unwrap();

        assert_eq!(cleanup.global_cleanup().await.unwrap(), 2);
        assert!(db.user_id_for_email(&seeded.email).is_ok());
    }

    #[tokio::test]
    async fn test_spec_without_prefix_is_refused() {
        let (cleanup, _db) = manager();
        let mut spec = TestUserSpec::unique("e2e-", "x");
        spec.email = "someone@example.com".into();
        assert!(cleanup.create_test_user_from(spec).await.is_err());
    }
}
