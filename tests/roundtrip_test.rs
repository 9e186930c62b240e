/*!
# Recording Round Trips

Drives the recorder with synthetic workloads, then reads the written trace
files back and checks that every invocation reconstructs to exactly the
stream that was recorded, with and without memory pressure.
*/

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use looptrace::parser::{CallTraceReader, LoopTraceReader};
use looptrace::record::{RecorderConfig, TraceRecorder};
use looptrace::{LoopId, Symbol};

type Expected = BTreeMap<(LoopId, u64), Vec<Symbol>>;

/// One invocation of the main loop: alternating calls, a site that only
/// fires every third invocation, and an iteration count that varies.
fn loop1_invocation(rec: &mut TraceRecorder, expected: &mut Expected, inv: u64) {
    rec.loop_invocation_start(1).unwrap();
    let stream = expected.entry((1, inv)).or_default();
    for i in 0..(3 + inv % 2) {
        rec.loop_iteration_start().unwrap();
        rec.instruction(10).unwrap();
        stream.push(10);
        if i % 2 == 0 {
            rec.call_start(100).unwrap();
            stream.push(100);
            rec.instruction(7).unwrap();
            rec.instruction(8).unwrap();
            rec.call_end().unwrap();
        }
        if i == 0 && inv % 3 == 2 {
            rec.call_start(200).unwrap();
            stream.push(200);
            rec.instruction(7).unwrap();
            rec.call_end().unwrap();
        }
        rec.instruction(11).unwrap();
        stream.push(11);
    }
    rec.loop_invocation_end().unwrap();
}

/// A second loop with a constant body, all invocations dedup together.
fn loop2_invocation(rec: &mut TraceRecorder, expected: &mut Expected, inv: u64) {
    rec.loop_invocation_start(2).unwrap();
    let stream = expected.entry((2, inv)).or_default();
    for _ in 0..2 {
        rec.loop_iteration_start().unwrap();
        rec.instruction(20).unwrap();
        rec.instruction(21).unwrap();
        stream.extend([20, 21]);
    }
    rec.loop_invocation_end().unwrap();
}

fn drive(rec: &mut TraceRecorder) -> Expected {
    let mut expected = Expected::new();
    for inv in 0..3 {
        loop1_invocation(rec, &mut expected, inv);
    }
    loop2_invocation(rec, &mut expected, 0);
    for inv in 3..6 {
        loop1_invocation(rec, &mut expected, inv);
    }
    for inv in 1..3 {
        loop2_invocation(rec, &mut expected, inv);
    }
    expected
}

fn record(dir: &Path, config: RecorderConfig) -> Expected {
    let mut rec = TraceRecorder::new(config.with_output_dir(dir)).unwrap();
    let expected = drive(&mut rec);
    rec.finish().unwrap();
    expected
}

fn count_dumps(dir: &Path) -> u64 {
    let mut reader = LoopTraceReader::from_dir(dir).unwrap();
    while reader.next_entry().unwrap().is_some() {}
    reader.dumps_seen()
}

/// Per (invocation, call site, call instance) body stream, read from the
/// raw call infos with the control flow still intact.
fn call_bodies(dir: &Path) -> BTreeMap<(u64, Symbol, u64), Vec<Symbol>> {
    let mut bodies = BTreeMap::new();
    let mut reader = CallTraceReader::from_dir(dir).unwrap();
    while let Some(info) = reader.next_entry().unwrap() {
        for n in info.invocations().instances() {
            for (&site, call) in info.calls() {
                for group in call.instance_groups() {
                    let mut body = Vec::new();
                    for pattern in group.control_flow() {
                        pattern.expand_into(&mut body);
                    }
                    for instance in group.instances().instances() {
                        bodies.insert((n, site, instance), body.clone());
                    }
                }
            }
        }
    }
    bodies
}

#[test]
fn reconstruction_matches_the_recorded_streams() {
    let dir = TempDir::new().unwrap();
    let expected = record(dir.path(), RecorderConfig::default());

    for (&(loop_id, inv), want) in &expected {
        let got = looptrace::expand_invocation(dir.path(), loop_id, inv).unwrap();
        assert_eq!(&got, want, "loop {loop_id} invocation {inv}");
    }
    assert_eq!(count_dumps(dir.path()), 1);
}

#[test]
fn tight_memory_limit_only_adds_dumps() {
    let roomy = TempDir::new().unwrap();
    let tight = TempDir::new().unwrap();
    let expected = record(roomy.path(), RecorderConfig::default());
    let expected_tight = record(
        tight.path(),
        RecorderConfig::default().with_max_memory_bytes(200),
    );
    assert_eq!(expected, expected_tight);

    assert!(count_dumps(tight.path()) > 1);

    for (&(loop_id, inv), want) in &expected {
        let got = looptrace::expand_invocation(tight.path(), loop_id, inv).unwrap();
        assert_eq!(&got, want, "loop {loop_id} invocation {inv}");
    }

    assert_eq!(call_bodies(roomy.path()), call_bodies(tight.path()));
}

#[test]
fn environment_overrides_apply() {
    std::env::set_var("LOOPTRACE_OUTPUT_DIRECTORY", "/tmp/trace_env");
    std::env::set_var("LOOPTRACE_MAX_MEM_USAGE", "12345");
    std::env::set_var("LOOPTRACE_TIMEOUT", "60");
    let config = RecorderConfig::from_env();
    std::env::remove_var("LOOPTRACE_OUTPUT_DIRECTORY");
    std::env::remove_var("LOOPTRACE_TIMEOUT");
    assert_eq!(config.output_dir, std::path::PathBuf::from("/tmp/trace_env"));
    assert_eq!(config.max_memory_bytes, 12345);
    assert_eq!(config.timeout, Some(Duration::from_secs(60)));

    std::env::set_var("LOOPTRACE_MAX_MEM_USAGE", "not-a-number");
    let config = RecorderConfig::from_env();
    std::env::remove_var("LOOPTRACE_MAX_MEM_USAGE");
    assert_eq!(config.max_memory_bytes, 1024 * 1024 * 1024);
}

#[test]
#[should_panic(expected = "still running at finish")]
fn finishing_inside_an_invocation_panics() {
    let dir = TempDir::new().unwrap();
    let config = RecorderConfig::default().with_output_dir(dir.path());
    let mut rec = TraceRecorder::new(config).unwrap();
    rec.loop_invocation_start(1).unwrap();
    rec.loop_iteration_start().unwrap();
    rec.instruction(5).unwrap();
    let _ = rec.finish();
}
