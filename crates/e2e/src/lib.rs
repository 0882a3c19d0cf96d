//! Persistcheck E2E Persistence Harness
//!
//! This crate verifies that state-changing UI actions really persist:
//! - Logs in through the real login form with seeded or throwaway accounts
//! - Finds events to act on through the data layer, falling back to the UI
//! - Captures the network exchange of each action and checks its endpoint
//! - Re-reads state after a reload and cross-checks it against the data layer
//! - Removes every user it created, even when a scenario panics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Suite Runner (Rust)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteRunner                                                │
//! │    ├── DriverFactory::create() -> BrowserDriver per plan    │
//! │    ├── run_scenario(ctx, invocation) -> ScenarioResult      │
//! │    │     ├── SessionContext    login_as / login_with        │
//! │    │     ├── EntityLocator     first_ticket / first_rsvp    │
//! │    │     ├── ActionInvoker     arm, click, capture, check   │
//! │    │     ├── PersistenceVerifier                            │
//! │    │     │     PostAction -> Reloaded -> CrossChecked       │
//! │    │     └── AuditVerifier     history record exists        │
//! │    └── CleanupManager::global_cleanup()                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuitePlan (YAML)                                           │
//! │    ├── name, category (regression | diagnostic), serial     │
//! │    └── steps: [ScenarioInvocation]                          │
//! │          ├── ticket_cancellation { user, event_id? }        │
//! │          ├── rsvp_lifecycle { user, event_id? }             │
//! │          ├── profile_update { user, fields }                │
//! │          ├── event_update { user, event_id?, fields }       │
//! │          └── page_diagnostic { path }                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DataLayer                                                  │
//! │    ├── SqliteDataLayer   direct reads of the app schema     │
//! │    └── ApiDataLayer      admin HTTP endpoints               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod accounts;
pub mod action;
pub mod api;
pub mod app;
pub mod artifacts;
pub mod audit;
pub mod cleanup;
pub mod config;
pub mod datalayer;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod persistence;
pub mod plan;
pub mod playwright;
pub mod runner;
pub mod scenarios;
pub mod selectors;
pub mod session;
pub mod wait;

pub use accounts::AccountTable;
pub use config::HarnessConfig;
pub use driver::{BrowserDriver, DriverFactory};
pub use error::{HarnessError, HarnessResult};
pub use plan::{ScenarioInvocation, SuitePlan};
pub use runner::{RunnerConfig, SuiteResult, SuiteRunner};
