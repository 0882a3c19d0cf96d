//! Seeded account table
//!
//! An immutable role -> credentials map. It is built once and handed to
//! each session explicitly; nothing reads it through a global.

use persistcheck_common::{Credentials, Role};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTable {
    accounts: BTreeMap<Role, Credentials>,
}

#[derive(Deserialize)]
struct AccountFile {
    accounts: BTreeMap<Role, Credentials>,
}

impl AccountTable {
    /// Accounts created by the development seed
    pub fn seeded() -> Self {
        let password = "Test123!";
        let accounts = Role::ALL
            .into_iter()
            .map(|role| {
                (
                    role,
                    Credentials::new(format!("{}@witchcityrope.com", role.as_str()), password),
                )
            })
            .collect();
        Self { accounts }
    }

    pub fn from_map(accounts: BTreeMap<Role, Credentials>) -> Self {
        Self { accounts }
    }

    /// Parse a YAML file of the form `accounts: { admin: { email, password } }`
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let file: AccountFile = serde_yaml::from_str(yaml)?;
        if file.accounts.is_empty() {
            return Err(HarnessError::Config("account table is empty".to_string()));
        }
        Ok(Self {
            accounts: file.accounts,
        })
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn get(&self, role: Role) -> HarnessResult<&Credentials> {
        self.accounts
            .get(&role)
            .ok_or_else(|| HarnessError::Config(format!("no account configured for role {role}")))
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.accounts.keys().copied()
    }
}

impl Default for AccountTable {
    fn default() -> Self {
        Self::seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_table_covers_every_role() {
        let table = AccountTable::seeded();
        assert_eq!(table.roles().count(), Role::ALL.len());
        assert_eq!(table.get(Role::Vetted).unwrap().email, "vetted@witchcityrope.com");
    }

    #[test]
    fn test_yaml_table_reports_missing_role() {
        let table = AccountTable::from_yaml(
            r#"
accounts:
  admin:
    email: root@example.com
    password: hunter2
"#,
        )
        .unwrap();
        assert_eq!(table.get(Role::Admin).unwrap().password, "hunter2");
        assert!(table.get(Role::Guest).is_err());
    }
}
