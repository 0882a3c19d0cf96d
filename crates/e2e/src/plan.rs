//! Declarative YAML suite plans
//!
//! A plan names a sequence of scenario invocations. Regression plans must be
//! able to fail; diagnostic plans only report what they saw and never fail
//! the run. The two categories are never mixed in one plan.

use persistcheck_common::{EventFields, EventKind, ProfileFields, Role};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Regression,
    Diagnostic,
}

/// A complete suite plan parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuitePlan {
    /// Unique name for this plan
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: Category,

    /// Tags for filtering plans
    #[serde(default)]
    pub tags: Vec<String>,

    /// Plans sharing an entity run one at a time, in file order
    #[serde(default)]
    pub serial: bool,

    /// Scenarios to execute in order; the first failure stops the plan
    pub steps: Vec<ScenarioInvocation>,
}

/// Whose session a scenario runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    /// A seeded account
    Role { role: Role },
    /// A throwaway account created for the scenario and deleted after it
    Fresh { fresh: String },
}

impl Default for UserRef {
    fn default() -> Self {
        UserRef::Fresh {
            fresh: "persist".to_string(),
        }
    }
}

fn default_admin() -> UserRef {
    UserRef::Role { role: Role::Admin }
}

fn default_event_kind() -> EventKind {
    EventKind::Ticketed
}

fn default_cancel_reason() -> String {
    crate::action::DEFAULT_CANCEL_REASON.to_string()
}

fn default_bad_email() -> String {
    "invalid@example.com".to_string()
}

fn default_bad_password() -> String {
    "wrongpassword".to_string()
}

/// One scenario with its parameters. `event_id` defaults to the first
/// suitable event found by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum ScenarioInvocation {
    /// Each role logs in and sees its own email
    LoginRoles { roles: Vec<Role> },

    /// Bad credentials are rejected on the login page
    LoginRejected {
        #[serde(default = "default_bad_email")]
        email: String,
        #[serde(default = "default_bad_password")]
        password: String,
    },

    TicketPurchase {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
    },

    TicketCancellation {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default = "default_cancel_reason")]
        reason: String,
    },

    /// Purchase, cancel, purchase again
    TicketLifecycle {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default = "default_cancel_reason")]
        reason: String,
    },

    RsvpCreate {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
    },

    RsvpCancel {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default = "default_cancel_reason")]
        reason: String,
    },

    /// RSVP, cancel, RSVP again
    RsvpLifecycle {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default = "default_cancel_reason")]
        reason: String,
    },

    /// An active RSVP hides the RSVP control
    DuplicateRsvpPrevented {
        #[serde(default)]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
    },

    /// Two fresh users RSVP to one event and cancel independently
    IndependentUserState {
        #[serde(default)]
        event_id: Option<String>,
    },

    ProfileUpdate {
        #[serde(default)]
        user: UserRef,
        fields: ProfileFields,
    },

    /// Edit an event through the admin form, then restore it
    EventUpdate {
        #[serde(default = "default_admin")]
        user: UserRef,
        #[serde(default)]
        event_id: Option<String>,
        /// Event to discover when `event_id` is not pinned
        #[serde(default = "default_event_kind")]
        kind: EventKind,
        fields: EventFields,
    },

    /// Record what a page shows; never fails on content
    PageDiagnostic {
        path: String,
        #[serde(default)]
        user: Option<UserRef>,
    },
}

impl ScenarioInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioInvocation::LoginRoles { .. } => "login_roles",
            ScenarioInvocation::LoginRejected { .. } => "login_rejected",
            ScenarioInvocation::TicketPurchase { .. } => "ticket_purchase",
            ScenarioInvocation::TicketCancellation { .. } => "ticket_cancellation",
            ScenarioInvocation::TicketLifecycle { .. } => "ticket_lifecycle",
            ScenarioInvocation::RsvpCreate { .. } => "rsvp_create",
            ScenarioInvocation::RsvpCancel { .. } => "rsvp_cancel",
            ScenarioInvocation::RsvpLifecycle { .. } => "rsvp_lifecycle",
            ScenarioInvocation::DuplicateRsvpPrevented { .. } => "duplicate_rsvp_prevented",
            ScenarioInvocation::IndependentUserState { .. } => "independent_user_state",
            ScenarioInvocation::ProfileUpdate { .. } => "profile_update",
            ScenarioInvocation::EventUpdate { .. } => "event_update",
            ScenarioInvocation::PageDiagnostic { .. } => "page_diagnostic",
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, ScenarioInvocation::PageDiagnostic { .. })
    }
}

impl SuitePlan {
    /// Parse a plan from YAML and check it is well formed
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let plan: SuitePlan = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| HarnessError::PlanParse(format!("{}: {e}", path.display())))
    }

    /// Load every `.yaml`/`.yml` plan below `dir`, sorted by path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        let mut plans = Vec::with_capacity(paths.len());
        for path in &paths {
            plans.push(Self::from_file(path)?);
        }

        let mut names = std::collections::HashSet::new();
        for plan in &plans {
            if !names.insert(plan.name.as_str()) {
                return Err(HarnessError::PlanParse(format!(
                    "duplicate plan name '{}'",
                    plan.name
                )));
            }
        }
        Ok(plans)
    }

    pub fn filter_by_tag<'a>(plans: &'a [Self], tag: &str) -> Vec<&'a Self> {
        plans.iter().filter(|p| p.tags.iter().any(|t| t == tag)).collect()
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.steps.is_empty() {
            return Err(HarnessError::PlanParse(format!("plan '{}' has no steps", self.name)));
        }
        let diagnostic_steps = self.steps.iter().filter(|s| s.is_diagnostic()).count();
        match self.category {
            Category::Regression if diagnostic_steps > 0 => Err(HarnessError::PlanParse(format!(
                "regression plan '{}' contains diagnostic steps",
                self.name
            ))),
            Category::Diagnostic if diagnostic_steps < self.steps.len() => {
                Err(HarnessError::PlanParse(format!(
                    "diagnostic plan '{}' contains regression steps",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}
