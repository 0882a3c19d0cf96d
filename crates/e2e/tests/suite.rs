//! Suite runner over the bundled plans, against the fake application

mod common;

use common::{seeded_database, test_config, Bugs, FakeFactory, LimitedDataLayer};
use persistcheck_common::Database;
use persistcheck_e2e::datalayer::{DataLayer, SqliteDataLayer};
use persistcheck_e2e::runner::{Outcome, RESULTS_FILE};
use persistcheck_e2e::{AccountTable, RunnerConfig, SuitePlan, SuiteResult, SuiteRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn plans_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/plans")
}

fn runner(db: &Database, accounts: AccountTable, bugs: Bugs, results: &Path) -> SuiteRunner {
    runner_with(db, Arc::new(SqliteDataLayer::new(db.clone())), accounts, bugs, results)
}

fn runner_with(
    db: &Database,
    data: Arc<dyn DataLayer>,
    accounts: AccountTable,
    bugs: Bugs,
    results: &Path,
) -> SuiteRunner {
    let mut harness = test_config(results);
    harness.plans_dir = plans_dir();
    harness.max_parallel = 2;
    let config = RunnerConfig {
        harness,
        include_diagnostics: true,
        ..Default::default()
    };
    SuiteRunner::new(
        config,
        Arc::new(FakeFactory { db: db.clone(), bugs }),
        data,
        accounts,
    )
}

fn outcome<'a>(suite: &'a SuiteResult, name: &str) -> &'a Outcome {
    &suite
        .results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no result for {name}"))
        .outcome
}

#[test]
fn test_bundled_plans_parse() {
    let plans = SuitePlan::load_all(&plans_dir()).unwrap();
    let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
    for expected in [
        "authentication",
        "ticket-cancellation",
        "rsvp-persistence",
        "profile-persistence",
        "event-update",
        "page-diagnostics",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[tokio::test]
async fn test_healthy_application_passes_every_plan() {
    let (db, accounts) = seeded_database();
    let results = tempfile::tempdir().unwrap();
    let runner = runner(&db, accounts, Bugs::default(), results.path());

    let suite = runner.run_all().await.unwrap();
    assert_eq!(suite.failed, 0, "{:#?}", suite.results);
    assert_eq!(suite.diagnostic, 1);
    assert_eq!(suite.passed, suite.total - 1);
    assert_eq!(suite.exit_code(), 0);
    assert_eq!(outcome(&suite, "page-diagnostics"), &Outcome::Diagnostic);

    // Results keep the plan order
    let loaded = SuitePlan::load_all(&plans_dir()).unwrap();
    let order: Vec<&str> = suite.results.iter().map(|r| r.name.as_str()).collect();
    let expected: Vec<&str> = loaded.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(order, expected);

    let path = runner.write_results(&suite).unwrap();
    assert_eq!(path, results.path().join(RESULTS_FILE));
    let written: SuiteResult = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written.total, suite.total);
    assert!(results.path().join("artifacts.json").exists());

    assert_eq!(db.delete_users_with_email_prefix(runner.cleanup().prefix()).unwrap(), 0);
}

#[tokio::test]
async fn test_regressions_fail_their_plans_only() {
    let (db, accounts) = seeded_database();
    let results = tempfile::tempdir().unwrap();
    let bugs = Bugs {
        legacy_ticket_endpoint: true,
        drops_empty_profile_fields: true,
        ..Default::default()
    };
    let runner = runner(&db, accounts, bugs, results.path());

    let suite = runner.run_all().await.unwrap();
    assert_eq!(suite.failed, 2, "{:#?}", suite.results);
    assert_eq!(suite.exit_code(), 1);

    match outcome(&suite, "ticket-cancellation") {
        Outcome::Failed(reason) => assert!(reason.starts_with("ticket_cancellation:"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(outcome(&suite, "profile-persistence"), Outcome::Failed(_)));
    assert_eq!(outcome(&suite, "rsvp-persistence"), &Outcome::Passed);
    assert_eq!(outcome(&suite, "authentication"), &Outcome::Passed);

    let failed = suite.results.iter().find(|r| r.name == "ticket-cancellation").unwrap();
    assert!(failed.scenarios[0].screenshot.is_some());
}

#[tokio::test]
async fn test_panicking_plan_is_contained_and_cleaned_up() {
    let (db, accounts) = seeded_database();
    let results = tempfile::tempdir().unwrap();
    let bugs = Bugs {
        panic_on_save: true,
        ..Default::default()
    };
    let runner = runner(&db, accounts, bugs, results.path());
    let plans = SuitePlan::load_all(&plans_dir()).unwrap();
    let selected: Vec<SuitePlan> = plans
        .into_iter()
        .filter(|p| p.name == "profile-persistence" || p.name == "authentication")
        .collect();

    let suite = runner.run_plans(&selected).await.unwrap();
    match outcome(&suite, "profile-persistence") {
        Outcome::Failed(reason) => assert!(reason.contains("panicked: profile save crashed"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(outcome(&suite, "authentication"), &Outcome::Passed);
    assert!(runner.cleanup().outstanding().is_empty());
    assert_eq!(db.delete_users_with_email_prefix(runner.cleanup().prefix()).unwrap(), 0);
}

#[tokio::test]
async fn test_unseeded_environment_skips_instead_of_failing() {
    let db = Database::open_memory().unwrap();
    let results = tempfile::tempdir().unwrap();
    let runner = runner(&db, AccountTable::seeded(), Bugs::default(), results.path());
    let plan = SuitePlan::from_yaml(
        "name: rsvp-only\nsteps:\n  - scenario: rsvp_create\n    user:\n      fresh: lonely\n",
    )
    .unwrap();

    let suite = runner.run_plans(&[plan]).await.unwrap();
    assert_eq!(suite.skipped, 1);
    assert_eq!(suite.exit_code(), 0);
    assert!(runner.cleanup().outstanding().is_empty());
}

#[tokio::test]
async fn test_checks_the_data_layer_cannot_make_are_skipped() {
    let (db, accounts) = seeded_database();
    let results = tempfile::tempdir().unwrap();
    let data = Arc::new(LimitedDataLayer::api_like(&db));
    let runner = runner_with(&db, data, accounts, Bugs::default(), results.path());
    let plans = SuitePlan::load_all(&plans_dir()).unwrap();
    let selected: Vec<SuitePlan> = plans
        .into_iter()
        .filter(|p| p.name == "profile-persistence" || p.name == "ticket-cancellation")
        .collect();

    let suite = runner.run_plans(&selected).await.unwrap();
    assert_eq!(suite.passed, 0, "{:#?}", suite.results);
    assert_eq!(suite.skipped, 2);
    match outcome(&suite, "profile-persistence") {
        Outcome::Skipped(reason) => assert!(reason.starts_with("profile_update:"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    match outcome(&suite, "ticket-cancellation") {
        Outcome::Skipped(reason) => assert!(reason.contains("audit"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_selection_by_tag_and_name() {
    let (db, accounts) = seeded_database();
    let results = tempfile::tempdir().unwrap();
    let mut harness = test_config(results.path());
    harness.plans_dir = plans_dir();
    let plans = SuitePlan::load_all(&plans_dir()).unwrap();
    let make = |config: RunnerConfig| {
        SuiteRunner::new(
            config,
            Arc::new(FakeFactory {
                db: db.clone(),
                bugs: Bugs::default(),
            }),
            Arc::new(SqliteDataLayer::new(db.clone())),
            accounts.clone(),
        )
    };

    let by_tag = make(RunnerConfig {
        harness: harness.clone(),
        tag: Some("persistence".into()),
        ..Default::default()
    });
    let selected = by_tag.select(&plans).unwrap();
    assert_eq!(selected.len(), 4);

    let regressions = make(RunnerConfig {
        harness: harness.clone(),
        ..Default::default()
    });
    assert!(regressions
        .select(&plans)
        .unwrap()
        .iter()
        .all(|p| p.name != "page-diagnostics"));

    let by_name = make(RunnerConfig {
        harness,
        plan: Some("nope".into()),
        ..Default::default()
    });
    assert!(by_name.select(&plans).is_err());
}
