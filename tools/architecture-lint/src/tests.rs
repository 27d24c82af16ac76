//! Unit tests for the architecture lint.

use std::path::PathBuf;

use rstest::rstest;

use super::*;

fn lint_one(file: &str, contents: &str) -> Result<(), ArchitectureLintError> {
    lint_sources(&[LintSource {
        file: PathBuf::from(file),
        contents: contents.to_owned(),
    }])
}

#[rstest]
#[case::inbound_uses_ports(
    "inbound/invocation.rs",
    "use crate::domain::ports::ProduceCommand; fn handle(_: &dyn ProduceCommand) {}",
    true
)]
#[case::outbound_uses_diesel(
    "outbound/persistence/diesel_event_store.rs",
    "use diesel::prelude::*; use crate::domain::ports::EventStore; fn query() {}",
    true
)]
#[case::domain_tests_use_tokio(
    "domain/producer/tests.rs",
    "#[tokio::test] async fn runs() {}",
    true
)]
#[case::inbound_uses_outbound(
    "inbound/invocation.rs",
    "use crate::outbound::broker::LoggingEventBroker; fn handle() { let _ = LoggingEventBroker; }",
    false
)]
#[case::inbound_uses_crate_name(
    "inbound/invocation.rs",
    "use eventproducer::outbound::persistence::DbPool; fn handle() {}",
    false
)]
#[case::domain_uses_super_outbound(
    "domain/producer/mod.rs",
    "use super::super::outbound::filesystem; fn load() {}",
    false
)]
#[case::domain_uses_lapin(
    "domain/batch_publisher.rs",
    "fn publish() { let _ = lapin::Connection::connect; }",
    false
)]
#[case::domain_uses_cap_std(
    "domain/mapping.rs",
    "use cap_std::fs::Dir; fn load(_: Dir) {}",
    false
)]
#[case::outbound_uses_inbound(
    "outbound/broker/amqp.rs",
    "use crate::inbound::invocation; fn publish() {}",
    false
)]
#[case::outbound_uses_clap(
    "outbound/filesystem.rs",
    "use clap::Parser; fn load() {}",
    false
)]
fn detects_boundary_violations(#[case] file: &str, #[case] contents: &str, #[case] ok: bool) {
    let result = lint_one(file, contents);
    assert_eq!(result.is_ok(), ok, "result: {result:?}");
}

#[rstest]
fn files_outside_the_layers_are_rejected() {
    let result = lint_one("config.rs", "fn load() {}");
    assert!(matches!(result, Err(ArchitectureLintError::Parse { .. })));
}

#[rstest]
fn violations_name_the_layer_and_crate() {
    let Err(ArchitectureLintError::Violations(violations)) =
        lint_one("domain/jobs.rs", "use diesel::sql_query; fn split() {}")
    else {
        panic!("expected a violation");
    };
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].message,
        "domain module must not depend on external crate `diesel`"
    );
}
