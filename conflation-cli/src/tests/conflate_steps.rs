//! Behaviour-driven step definitions driving the conflate command scenarios.

use super::helpers::{CADASTRE_LINE, SOURCE_WAY, StubServices, Workspace};
use super::*;
use crate::conflate::{RunArgs, RunConfig, execute_conflate};
use crate::summary::{SummaryConfig, execute_summary};
use conflation_core::test_support::{MemoryGeoQuery, line_way};
use conflation_core::{ElementSet, ProcessingState};
use conflation_data::progress;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::{Cell, RefCell};

const MAP_WAY: i64 = 40;

/// Aggregates conflate scenario state behind a single world argument.
#[derive(Debug)]
struct ConflateWorld {
    workspace: Workspace,
    services: RefCell<StubServices>,
    calls_before: Cell<usize>,
    output: RefCell<Vec<u8>>,
    result: RefCell<Option<Result<(), CliError>>>,
}

impl ConflateWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            services: RefCell::new(StubServices::new(
                MemoryGeoQuery::default(),
                ElementSet::default(),
            )),
            calls_before: Cell::new(0),
            output: RefCell::new(Vec::new()),
            result: RefCell::new(None),
        }
    }

    fn config(&self) -> RunConfig {
        let args = RunArgs {
            input: Some(self.workspace.path("cadastre.osm")),
            progress: Some(self.workspace.path("state/progress.db")),
            country: Some("Srbija".into()),
            dry_run: Some(true),
            way_pause: Some(0),
            retry_delay: Some(0),
            ..RunArgs::default()
        };
        RunConfig::try_from(args).expect("config builds")
    }

    fn run(&self) -> Result<(), CliError> {
        let services = self.services.borrow();
        self.calls_before.set(services.query.calls());
        let mut output = self.output.borrow_mut();
        output.clear();
        execute_conflate(&self.config(), &*services, &mut *output)
    }

    fn printed(&self) -> serde_json::Value {
        serde_json::from_slice(&self.output.borrow()).expect("summary is JSON")
    }
}

#[fixture]
fn world() -> ConflateWorld {
    ConflateWorld::new()
}

#[given("the sample cadastre file")]
fn sample_cadastre(#[from(world)] world: &ConflateWorld) {
    let path = world.workspace.cadastre();
    assert!(path.as_std_path().is_file(), "cadastre written");
}

#[given("no cadastre file")]
fn no_cadastre(#[from(world)] world: &ConflateWorld) {
    assert!(!world.workspace.path("cadastre.osm").as_std_path().exists());
}

#[given("a map way that already follows the cadastre")]
fn matching_map(#[from(world)] world: &ConflateWorld) {
    let map = line_way(MAP_WAY, 100, &CADASTRE_LINE);
    world.services.replace(StubServices::new(
        MemoryGeoQuery::default().with_single("1", map.clone()),
        map,
    ));
}

#[given("conflate has already run")]
fn already_run(#[from(world)] world: &ConflateWorld) {
    world.run().expect("first run succeeds");
}

#[when("I run conflate as a dry run")]
fn run_dry(#[from(world)] world: &ConflateWorld) {
    let outcome = world.run();
    world.result.replace(Some(outcome));
}

#[when("I summarise the progress store")]
fn summarise(#[from(world)] world: &ConflateWorld) {
    let config = SummaryConfig {
        progress: world.workspace.path("state/progress.db"),
    };
    let mut output = world.output.borrow_mut();
    output.clear();
    let outcome = execute_summary(&config, &mut *output);
    world.result.replace(Some(outcome));
}

#[then("the printed summary counts one way in state {state:word}")]
fn printed_summary(#[from(world)] world: &ConflateWorld, state: String) {
    let borrowed = world.result.borrow();
    if let Some(Err(err)) = borrowed.as_ref() {
        panic!("command failed: {err}");
    }
    let summary = world.printed();
    assert_eq!(summary["total_ways"], 1);
    let states = summary["states"].as_array().expect("state list");
    let entry = states
        .iter()
        .find(|entry| entry["state"] == state.as_str())
        .unwrap_or_else(|| panic!("state {state} missing from {summary}"));
    assert_eq!(entry["count"], 1);
}

#[then("the progress store records the cadastre way as {state:word}")]
fn stored_state(#[from(world)] world: &ConflateWorld, state: String) {
    let expected = ProcessingState::from_name(&state).expect("known state");
    let records = progress::read_records(&world.workspace.path("state/progress.db"))
        .expect("read store");
    let record = records.get(SOURCE_WAY).expect("record stored");
    assert_eq!(record.processed, expected);
}

#[then("no map queries were issued by the last run")]
fn no_queries(#[from(world)] world: &ConflateWorld) {
    let calls = world.services.borrow().query.calls();
    assert_eq!(calls, world.calls_before.get());
}

#[then("the CLI reports that the input file is missing")]
fn reports_missing_input(#[from(world)] world: &ConflateWorld) {
    let borrowed = world.result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingSourceFile { field, .. } => assert_eq!(*field, ARG_INPUT),
        other => panic!("unexpected error {other:?}"),
    }
}

macro_rules! register_conflate_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/conflate_command.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: ConflateWorld) {
            let _ = world;
        }
    };
}

register_conflate_scenario!(conflating_matching_way, "conflating a way that already matches");
register_conflate_scenario!(resuming_finished_run, "resuming a finished run");
register_conflate_scenario!(summarising_progress, "summarising a progress store");
register_conflate_scenario!(rejecting_missing_cadastre, "rejecting a missing cadastre file");
