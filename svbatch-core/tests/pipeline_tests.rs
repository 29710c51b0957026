//! Pipeline stage tests
//!
//! Runs single units through load → merge → middleware → split/dump
//! against the recording fake plugins.

mod helpers;

use helpers::*;
use serde_json::json;
use std::path::PathBuf;
use svbatch_core::pipeline::Pipeline;
use svbatch_core::{ConversionMode, ConversionSettings, Error, FailureKind, UnitSpec};

fn resolve(settings: &ConversionSettings) -> (Pipeline<FakeProject>, CallLog) {
    let (registry, log) = fake_registry();
    let pipeline = Pipeline::resolve(registry.as_ref(), settings).expect("pipeline should resolve");
    (pipeline, log)
}

// ============================================================================
// Load / merge
// ============================================================================

#[test]
fn test_merge_loads_each_source_once_and_dumps_once() {
    let settings = ConversionSettings::new("ust", "out").with_mode(ConversionMode::Merge);
    let (pipeline, log) = resolve(&settings);
    let unit = UnitSpec::new(
        "m1",
        vec![PathBuf::from("/in/a.ust"), PathBuf::from("/in/b.ust"), PathBuf::from("/in/c.ust")],
        "medley",
    );

    let output = pipeline.run(&unit).expect("merge unit should succeed");

    assert_eq!(log.count("load:"), 3);
    assert_eq!(log.count("dump:"), 1);
    assert_eq!(output.artifacts.len(), 1);
    assert_eq!(output.artifacts[0].name, "main.out");

    let project = read_project(&output.artifacts[0].bytes);
    assert_eq!(project.merges, 1, "merge must run exactly once");
    // Source order is preserved
    assert_eq!(project.tracks, vec!["a#1", "b#1", "c#1"]);
    assert_eq!(log.entries()[..3], ["load:a", "load:b", "load:c"]);
}

#[test]
fn test_merge_of_single_source_still_merges() {
    let settings = ConversionSettings::new("ust", "out").with_mode(ConversionMode::Merge);
    let (pipeline, _log) = resolve(&settings);
    let unit = UnitSpec::new("m1", vec![PathBuf::from("/in/solo.ust")], "solo");

    let output = pipeline.run(&unit).unwrap();
    assert_eq!(read_project(&output.artifacts[0].bytes).merges, 1);
}

#[test]
fn test_load_failure_stops_before_dump() {
    let settings = ConversionSettings::new("ust", "out").with_mode(ConversionMode::Merge);
    let (pipeline, log) = resolve(&settings);
    let unit = UnitSpec::new(
        "m1",
        vec![PathBuf::from("/in/a.ust"), PathBuf::from("/in/b_fail.ust"), PathBuf::from("/in/c.ust")],
        "medley",
    );

    let failed = pipeline.run(&unit).unwrap_err();

    assert_eq!(failed.failure.kind, FailureKind::Load);
    assert!(failed.failure.message.contains("corrupt file b_fail"));
    assert_eq!(log.count("load:"), 2, "loading stops at the first failure");
    assert_eq!(log.count("dump:"), 0);
}

// ============================================================================
// Split
// ============================================================================

#[test]
fn test_split_names_parts_with_two_digit_ordinals() {
    let (pipeline, log) = resolve(&split(2));
    let unit = unit("s1", "choir_t5.ust", "choir");

    let output = pipeline.run(&unit).unwrap();

    let names: Vec<_> = output.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["01.ust", "02.ust", "03.ust"]);
    assert_eq!(log.count("dump:"), 3);

    let last = read_project(&output.artifacts[2].bytes);
    assert_eq!(last.tracks, vec!["choir_t5#5"]);
}

#[test]
fn test_split_requires_track_limit() {
    let (registry, _log) = fake_registry();
    let settings = ConversionSettings::new("ust", "ust").with_mode(ConversionMode::Split);
    assert!(matches!(
        Pipeline::resolve(registry.as_ref(), &settings),
        Err(Error::InvalidBatch(_))
    ));
}

// ============================================================================
// Middleware chain
// ============================================================================

#[test]
fn test_middlewares_run_in_caller_order() {
    let settings = direct("ust", "out")
        .with_middleware("tag", json!({ "label": "first" }))
        .with_middleware("tag", json!({ "label": "second" }));
    let (pipeline, log) = resolve(&settings);

    let output = pipeline.run(&unit("u1", "song.ust", "song")).unwrap();

    let middleware_calls: Vec<_> = log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("mw:"))
        .collect();
    assert_eq!(middleware_calls, vec!["mw:first", "mw:second"]);
    assert_eq!(
        read_project(&output.artifacts[0].bytes).tracks,
        vec!["song#1+first+second"]
    );
}

#[test]
fn test_middleware_failure_discards_the_attempt() {
    let settings = direct("ust", "out")
        .with_middleware("tag", json!({}))
        .with_middleware("explode", json!({}))
        .with_middleware("tag", json!({ "label": "never" }));
    let (pipeline, log) = resolve(&settings);

    let failed = pipeline.run(&unit("u1", "song.ust", "song")).unwrap_err();

    assert_eq!(failed.failure.kind, FailureKind::Middleware);
    assert!(failed.failure.message.starts_with("explode:"));
    assert_eq!(log.count("mw:never"), 0);
    assert_eq!(log.count("dump:"), 0, "nothing partial is dumped");
    // Warnings raised before the failure survive
    assert_eq!(
        failed.diagnostics.warning_text().as_deref(),
        Some("pitch curve discarded")
    );
}

#[test]
fn test_unknown_middleware_is_structural() {
    let (registry, _log) = fake_registry();
    let settings = direct("ust", "out").with_middleware("reverb", json!({}));
    assert!(matches!(
        Pipeline::resolve(registry.as_ref(), &settings),
        Err(Error::UnsupportedMiddleware(id)) if id == "reverb"
    ));
}

// ============================================================================
// Dump / options
// ============================================================================

#[test]
fn test_missing_dump_operation_is_unsupported_format() {
    let (pipeline, _log) = resolve(&direct("ust", "readonly"));
    let failed = pipeline.run(&unit("u1", "song.ust", "song")).unwrap_err();
    assert_eq!(failed.failure.kind, FailureKind::UnsupportedFormat);
}

#[test]
fn test_dump_that_writes_nothing_fails() {
    let mut settings = direct("ust", "out");
    settings.output_options = json!({ "write": false });
    let (pipeline, _log) = resolve(&settings);

    let failed = pipeline.run(&unit("u1", "song.ust", "song")).unwrap_err();
    assert_eq!(failed.failure.kind, FailureKind::Dump);
    assert!(failed.failure.message.contains("no output written"));
}

#[test]
fn test_options_validated_and_defaults_applied() {
    let mut settings = direct("ust", "out");
    settings.output_options = json!({ "fail": "yes" });
    let (registry, _log) = fake_registry();
    assert!(matches!(
        Pipeline::resolve(registry.as_ref(), &settings),
        Err(Error::InvalidOptions { plugin, .. }) if plugin == "out"
    ));

    let mut settings = direct("ust", "out");
    settings.input_options = json!({ "strict": true });
    let (pipeline, _log) = resolve(&settings);
    assert_eq!(
        pipeline.settings().input_options,
        json!({ "encoding": "utf-8", "strict": true })
    );
    assert_eq!(pipeline.output_suffix(), "out");
}

#[test]
fn test_warnings_collected_on_success() {
    let (pipeline, _log) = resolve(&direct("ust", "out"));
    let output = pipeline.run(&unit("u1", "song_warn.ust", "song")).unwrap();
    assert_eq!(
        output.diagnostics.warning_text().as_deref(),
        Some("song_warn: lyrics missing")
    );
}
