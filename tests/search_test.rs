//! Focus Search Testing
//!
//! Drives the coarse-to-fine search with scripted metric sequences and an
//! in-memory motor:
//! - Coarse peak detection and tie-breaking
//! - Skipped samples after acquisition failures
//! - Actuator faults in each phase
//! - Convergence versus an exhausted fine-sweep budget
//! - Motor traffic of each phase

use mcam_autofocus::errors::FailureReason;
use mcam_autofocus::focus::{FocusActuator, FocusSearch};
use mcam_autofocus::invariant_ppt::contract_test;
use mcam_autofocus::testing::{RecordingSleeper, ScriptedFrameSource, ScriptedMotor};
use mcam_autofocus::types::{CameraHandle, HostEndpoint, SearchPhase, SearchResult};
use mcam_autofocus::{AutofocusConfig, CancelToken};
use std::time::Duration;

const COARSE: usize = 22;

fn camera(id: u32) -> CameraHandle {
    CameraHandle::new(id, HostEndpoint::new("10.0.1.1", 9999))
}

/// Coarse metrics `[1, 2, 3, 2, 1, 0, 0, ...]`.
fn peaked_coarse_curve() -> Vec<Option<f64>> {
    let mut metrics = vec![Some(1.0), Some(2.0), Some(3.0), Some(2.0), Some(1.0)];
    metrics.resize(COARSE, Some(0.0));
    metrics
}

fn run_search(
    config: &AutofocusConfig,
    id: u32,
    motor: ScriptedMotor,
    frames: &mut ScriptedFrameSource,
) -> (SearchResult, ScriptedMotor) {
    let sleeper = RecordingSleeper::new();
    let cancel = CancelToken::new();
    let engine = FocusSearch::new(config, &sleeper).unwrap();
    let mut actuator = FocusActuator::new(motor, Duration::ZERO, &sleeper, &cancel);
    let result = engine.run(&camera(id), &mut actuator, frames);
    (result, actuator.into_motor())
}

#[test]
fn test_coarse_peak_first_maximum() {
    let mut script = peaked_coarse_curve();
    script.push(Some(2.0)); // reseed
    let mut frames = ScriptedFrameSource::new(script).then_repeat(3.0);

    let (result, motor) = run_search(&AutofocusConfig::default(), 1, ScriptedMotor::new(), &mut frames);

    assert_eq!(result.coarse_best_index, 3);
    assert_eq!(result.final_metric, 3.0);
    let coarse: Vec<_> = result
        .samples
        .iter()
        .filter(|s| s.phase == SearchPhase::CoarseSweep)
        .collect();
    assert_eq!(coarse.len(), COARSE);
    // Sample i is taken at i * coarse_step before the move.
    assert_eq!(coarse[2].position, 200);
    assert_eq!(coarse[2].metric, Some(3.0));
    // Backoff: 2200 - 3 * 100.
    assert_eq!(motor.moves()[COARSE], -1900);
}

#[test]
fn test_failed_grab_skips_coarse_iteration() {
    let mut script: Vec<Option<f64>> = (1..=COARSE).map(|i| Some(i as f64)).collect();
    script[4] = None; // iteration 5 of 22
    let mut frames = ScriptedFrameSource::new(script).then_repeat(1.0);

    let (result, motor) = run_search(&AutofocusConfig::default(), 1, ScriptedMotor::new(), &mut frames);

    let coarse: Vec<_> = result
        .samples
        .iter()
        .filter(|s| s.phase == SearchPhase::CoarseSweep)
        .collect();
    assert_eq!(coarse.len(), COARSE);
    assert_eq!(coarse[4].metric, None);
    assert_eq!(coarse[4].previous_metric, 4.0);
    // Iteration 6 still compares against iteration 4's metric.
    assert_eq!(coarse[5].metric, Some(6.0));
    assert_eq!(coarse[5].previous_metric, 4.0);
    // The skipped iteration still moved the motor.
    assert_eq!(coarse[5].position, 500);
    assert!(motor.moves()[..COARSE].iter().all(|&m| m == 100));
    assert_eq!(result.skipped_samples, 1);
    assert_eq!(result.coarse_best_index, COARSE as u32);
}

#[test]
fn test_actuator_fault_in_fine_sweep() {
    let mut script = peaked_coarse_curve();
    script.push(Some(2.0));
    let mut frames = ScriptedFrameSource::new(script).then_repeat(2.5);
    // home + 22 coarse + reposition + first fine move succeed.
    let motor = ScriptedMotor::new().fail_on_command(26);

    let (result, motor) = run_search(&AutofocusConfig::default(), 3, motor, &mut frames);

    assert!(!result.converged);
    assert_eq!(result.failure_reason, Some(FailureReason::ActuatorFault));
    assert_eq!(result.fine_iterations, 1);
    assert_eq!(result.final_position, 290);
    assert_eq!(motor.moves().iter().sum::<i64>(), 290);
}

#[test]
fn test_actuator_fault_during_coarse_sweep_keeps_last_position() {
    let mut frames = ScriptedFrameSource::repeating(1.0);
    let motor = ScriptedMotor::new().fail_on_command(6);

    let (result, _) = run_search(&AutofocusConfig::default(), 1, motor, &mut frames);

    assert_eq!(result.failure_reason, Some(FailureReason::ActuatorFault));
    assert_eq!(result.final_position, 400);
    assert_eq!(result.fine_iterations, 0);
}

#[test]
fn test_converged_and_exhausted_cameras() {
    let config = AutofocusConfig::default();

    let mut fast = peaked_coarse_curve();
    fast.push(Some(1.0));
    fast.extend([1.5, 2.0, 2.2, 2.5, 2.7, 2.9, 3.0, 3.0].map(Some));
    let mut fast = ScriptedFrameSource::new(fast);

    let mut slow = peaked_coarse_curve();
    slow.push(Some(1.0));
    let mut slow = ScriptedFrameSource::new(slow).then_repeat(2.0);

    let (converged, _) = run_search(&config, 1, ScriptedMotor::new(), &mut fast);
    let (exhausted, motor) = run_search(&config, 2, ScriptedMotor::new(), &mut slow);

    assert!(converged.converged);
    assert_eq!(converged.failure_reason, None);
    assert_eq!(converged.fine_iterations, 8);
    // Eight steps near, one back for the overshoot.
    assert_eq!(converged.final_position, 300 - 80 + 10);

    assert!(!exhausted.converged);
    assert_eq!(exhausted.failure_reason, None);
    assert_eq!(exhausted.fine_iterations, 20);
    assert_eq!(exhausted.final_position, 300 - 200);
    assert_eq!(motor.moves().last(), Some(&-10));
}

#[test]
fn test_reseed_falls_back_to_zero() {
    let mut script = peaked_coarse_curve();
    script.extend([None, None, None]);
    // Seeded with 0.0, the first fine sample cannot converge.
    script.extend([Some(3.0), Some(3.0)]);
    let mut frames = ScriptedFrameSource::new(script);

    let (result, _) = run_search(&AutofocusConfig::default(), 1, ScriptedMotor::new(), &mut frames);

    let reseeds = result
        .samples
        .iter()
        .filter(|s| s.phase == SearchPhase::Repositioning)
        .count();
    assert_eq!(reseeds, 3);
    assert!(result.converged);
    assert_eq!(result.fine_iterations, 2);
}

#[test]
fn test_fine_sweep_tolerates_skipped_samples() {
    let mut script = peaked_coarse_curve();
    script.push(Some(2.0));
    script.extend([Some(3.0), None, None, Some(3.0)]);
    let mut frames = ScriptedFrameSource::new(script);

    let (result, _) = run_search(&AutofocusConfig::default(), 1, ScriptedMotor::new(), &mut frames);

    assert!(result.converged);
    assert_eq!(result.fine_iterations, 4);
    assert_eq!(result.skipped_samples, 2);
    assert_eq!(result.final_position, 300 - 40 + 10);
}

#[test]
fn test_custom_range_and_steps() {
    let mut config = AutofocusConfig::default();
    config.search.total_range = 1000;
    config.search.coarse_step = 250;
    config.search.fine_step = 25;
    config.search.fine_iterations = 5;

    let script = vec![Some(1.0), Some(4.0), Some(2.0), Some(1.0), Some(3.0)];
    let mut frames = ScriptedFrameSource::new(script).then_repeat(4.0);

    let (result, motor) = run_search(&config, 1, ScriptedMotor::new(), &mut frames);

    assert_eq!(result.coarse_best_index, 2);
    assert_eq!(&motor.moves()[..4], &[250, 250, 250, 250]);
    assert_eq!(motor.moves()[4], -500);
    assert!(result.converged);
    assert_eq!(result.final_position, 500 - 50 + 25);
}

#[test]
fn test_uneven_range_backs_off_to_best_coarse_position() {
    let mut config = AutofocusConfig::default();
    config.search.total_range = 1050;
    config.search.coarse_step = 100;

    let mut script: Vec<Option<f64>> = vec![Some(1.0), Some(5.0)];
    script.resize(10, Some(0.5));
    let mut frames = ScriptedFrameSource::new(script).then_repeat(5.0);

    let (result, motor) = run_search(&config, 1, ScriptedMotor::new(), &mut frames);

    assert_eq!(result.coarse_best_index, 2);
    // 10 iterations end at 1000; the target is 2 * 100.
    assert_eq!(motor.moves()[10], -800);
}

#[test]
fn test_search_invariants_are_exercised() {
    let mut script = peaked_coarse_curve();
    script.push(Some(2.0));
    let mut frames = ScriptedFrameSource::new(script).then_repeat(3.0);
    run_search(&AutofocusConfig::default(), 1, ScriptedMotor::new(), &mut frames);

    contract_test(
        "focus search",
        &[
            "global best metric never decreases",
            "focus position equals the sum of issued steps",
        ],
    );
}
