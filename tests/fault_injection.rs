//! Failure paths: forced mismatches and a peer that never echoes.

use echo_harness::runtime::Role;
use echo_harness::{
    Config, DispatchMode, FaultInjection, HarnessError, Payload, RunConfiguration,
    ScenarioMatrix, SendMode,
};
use std::time::Duration;

const PAYLOAD_LEN: usize = 256 * 1024;
const MISMATCH_AT: usize = 12345;

fn matrix(deadline: Duration) -> ScenarioMatrix {
    let config = Config {
        payload_len: PAYLOAD_LEN,
        deadline,
        ..Config::default()
    };
    ScenarioMatrix::with_payload(config, Payload::generate(42, PAYLOAD_LEN))
}

fn assert_mismatch_on_accepting(dispatch: DispatchMode) {
    let matrix = matrix(Duration::from_secs(30));
    let report = matrix.run_with_fault(
        RunConfiguration::new(dispatch, SendMode::Acknowledged),
        FaultInjection::ForcedMismatch {
            role: Role::Accepting,
            offset: MISMATCH_AT,
        },
    );

    assert!(!report.passed());
    match &report.outcome {
        Err(HarnessError::Verification { offset, .. }) => assert_eq!(*offset, MISMATCH_AT),
        other => panic!("expected a verification failure, got {other:?}"),
    }
    assert_eq!(report.accepting.failures_observed, 1);

    // Nothing past the bad chunk was counted or echoed back
    assert!(report.accepting.received <= MISMATCH_AT);
    assert!(report.originating.received <= MISMATCH_AT);
    assert!(
        report.teardown_errors.is_empty(),
        "{:?}",
        report.teardown_errors
    );
}

#[test]
fn test_mismatch_on_accepting_inline() {
    assert_mismatch_on_accepting(DispatchMode::Inline);
}

#[test]
fn test_mismatch_on_accepting_offloaded() {
    assert_mismatch_on_accepting(DispatchMode::Offloaded);
}

#[test]
fn test_mismatch_on_originating() {
    let matrix = matrix(Duration::from_secs(30));
    let report = matrix.run_with_fault(
        RunConfiguration::new(DispatchMode::Inline, SendMode::FireAndForget),
        FaultInjection::ForcedMismatch {
            role: Role::Originating,
            offset: MISMATCH_AT,
        },
    );

    match report.check() {
        Err(HarnessError::Verification { offset, .. }) => assert_eq!(offset, MISMATCH_AT),
        other => panic!("expected a verification failure, got {other:?}"),
    }
}

#[test]
fn test_missing_echo_times_out() {
    let matrix = matrix(Duration::from_millis(500));
    let report = matrix.run_with_fault(
        RunConfiguration::new(DispatchMode::Offloaded, SendMode::Acknowledged),
        FaultInjection::DropEcho,
    );

    match &report.outcome {
        Err(HarnessError::Timeout {
            originating, total, ..
        }) => {
            assert_eq!(*originating, 0);
            assert_eq!(*total, PAYLOAD_LEN);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(report.originating.received, 0);
    assert!(report.elapsed >= Duration::from_millis(500));

    // Teardown still closed all three resources
    assert!(
        report.teardown_errors.is_empty(),
        "{:?}",
        report.teardown_errors
    );
}
