//! Integration tests exercising the pipeline end to end against the
//! dry-run transport, the way `tests/` is used across the pack for
//! whole-binary checks rather than single-module behavior.

use std::time::Duration;

use clap::Parser;

use webfuzz::cli::Cli;
use webfuzz::config::RunConfig;
use webfuzz::filter::SimpleFilter;
use webfuzz::item::{HeaderList, Method};
use webfuzz::payload::PayloadSource;
use webfuzz::pipeline::Fuzzer;

fn dry_run_config(hard_filter: bool, auto_filter: bool) -> RunConfig {
    RunConfig {
        target: "http://h/FUZZ".into(),
        method: Method::Get,
        body: None,
        headers: HeaderList::default(),
        follow_redirects: false,
        domain_based_scope: false,
        sources: vec![PayloadSource::from_words(vec![
            "admin".into(),
            "api".into(),
            "backup".into(),
        ])],
        concurrent: 8,
        delay: Duration::default(),
        proxy: None,
        timeout: Duration::from_secs(2),
        user_agent: None,
        dry_run: true,
        no_scanmode: false,
        limit_requests: None,
        max_rlevel: 1,
        max_plugin_rlevel: 1,
        scripts: Vec::new(),
        use_default_scripts: false,
        cancel_on_plugin_exception: false,
        filter_expr: None,
        prefilter_exprs: Vec::new(),
        hard_filter,
        auto_filter,
        simple: SimpleFilter::default(),
        verbose: false,
        no_color: true,
        quiet: true,
        out_file: None,
    }
}

#[test]
fn discovers_every_payload_under_the_target() {
    let fuzzer = Fuzzer::build(&dry_run_config(false, false)).unwrap();
    let summary = fuzzer.run().unwrap();
    // root ("") + admin + api + backup = 4 transported requests.
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.filtered, 0);
}

#[test]
fn hard_filter_reordering_does_not_change_what_gets_transported() {
    let fuzzer = Fuzzer::build(&dry_run_config(true, false)).unwrap();
    let summary = fuzzer.run().unwrap();
    assert_eq!(summary.processed, 4);
}

#[test]
fn auto_filter_stage_does_not_drop_results_from_the_run() {
    // Discarded results still flow to the results sink via the
    // discard-drain rather than vanishing, so wiring the auto-filter stage
    // into the chain can never change how many requests were processed,
    // whether or not its sample threshold is crossed.
    let fuzzer = Fuzzer::build(&dry_run_config(false, true)).unwrap();
    let summary = fuzzer.run().unwrap();
    assert_eq!(summary.processed, 4);
}

#[test]
fn cli_flags_assemble_into_a_working_pipeline() {
    let cli = Cli::try_parse_from([
        "webfuzz",
        "-u",
        "http://h/FUZZ",
        "-z",
        "admin,api",
        "--dry-run",
        "-a",
        "-c",
    ])
    .expect("well-formed CLI invocation should parse");
    let config = cli.into_config().expect("config assembly should succeed");
    let fuzzer = Fuzzer::build(&config).unwrap();
    let summary = fuzzer.run().unwrap();
    // root + admin + api = 3 transported requests.
    assert_eq!(summary.processed, 3);
}

#[test]
fn missing_marker_is_rejected_before_any_request_is_built() {
    let cli = Cli::try_parse_from([
        "webfuzz",
        "-u",
        "http://h/admin",
        "-z",
        "admin,api",
        "--dry-run",
    ])
    .unwrap();
    let config = cli.into_config().expect("flag assembly has no marker check");
    let err = Fuzzer::build(&config).expect_err("no FUZZ marker in target or body");
    assert!(err.to_string().contains("marker"));
}
