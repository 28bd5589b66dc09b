use crate::assert_invariant;
use crate::config::{AutofocusConfig, HomingMode, SearchConfig, TimingConfig};
use crate::errors::{AcquisitionFailure, AutofocusError, FailureReason};
use crate::focus::actuator::{FocusActuator, FocusMotor};
use crate::focus::frame_source::FrameSource;
use crate::timing::Sleeper;
use crate::types::{CameraHandle, SampleRecord, SearchPhase, SearchResult, SearchState};
use std::time::Instant;

impl SearchState {
    /// Feed one coarse-sweep sample taken at 0-based `iteration`.
    ///
    /// Strict `>` on both comparisons: a plateau keeps the first peak.
    pub fn observe_coarse(&mut self, iteration: u32, metric: f64) {
        let before = self.global_best_metric;
        if metric > self.previous_metric {
            self.local_best_metric = metric;
            if self.local_best_metric > self.global_best_metric {
                self.global_best_metric = self.local_best_metric;
                self.global_best_position = iteration + 1;
            }
        }
        self.previous_metric = metric;

        assert_invariant!(
            self.global_best_metric >= before,
            "global best metric never decreases",
            "focus::search"
        );
    }

    /// Convergence predicate of the fine sweep.
    pub fn is_fine_optimum(&self, metric: f64) -> bool {
        metric >= self.global_best_metric && self.previous_metric >= metric
    }

    /// Feed one fine-sweep sample. Returns true once the peak is passed.
    ///
    /// The global best is never touched here; a converged state ignores
    /// further samples.
    pub fn observe_fine(&mut self, metric: f64) -> bool {
        if self.converged {
            return true;
        }
        let before = self.global_best_metric;
        if self.is_fine_optimum(metric) {
            self.converged = true;
        } else {
            self.previous_metric = metric;
        }

        assert_invariant!(
            self.global_best_metric >= before,
            "global best metric never decreases",
            "focus::search"
        );
        self.converged
    }
}

/// Why a search stopped before reaching a terminal phase on its own.
#[derive(Debug)]
enum SearchAbort {
    Device(AutofocusError),
    NoSamples,
}

impl From<AutofocusError> for SearchAbort {
    fn from(err: AutofocusError) -> Self {
        SearchAbort::Device(err)
    }
}

impl SearchAbort {
    fn reason(&self) -> FailureReason {
        match self {
            SearchAbort::Device(err) => err.failure_reason(),
            SearchAbort::NoSamples => FailureReason::AcquisitionFailure,
        }
    }
}

#[derive(Debug, Default)]
struct Trace {
    samples: Vec<SampleRecord>,
    skipped: u32,
    fine_iterations: u32,
}

impl Trace {
    fn record(
        &mut self,
        state: &SearchState,
        iteration: u32,
        position: i64,
        outcome: &Result<f64, AcquisitionFailure>,
    ) {
        let metric = match outcome {
            Ok(metric) => Some(*metric),
            Err(_) => {
                self.skipped += 1;
                None
            }
        };
        self.samples.push(SampleRecord {
            phase: state.phase,
            iteration,
            position,
            metric,
            previous_metric: state.previous_metric,
        });
    }
}

/// Coarse-to-fine hill-climbing focus search for a single camera.
///
/// The engine owns no device state. It drives whatever [`FocusActuator`]
/// and [`FrameSource`] it is handed, so the same engine runs against real
/// hardware, the simulator or scripted doubles.
pub struct FocusSearch<'a> {
    search: SearchConfig,
    timing: TimingConfig,
    sleeper: &'a dyn Sleeper,
}

impl<'a> FocusSearch<'a> {
    /// Build an engine, rejecting invalid configuration up front.
    pub fn new(config: &AutofocusConfig, sleeper: &'a dyn Sleeper) -> Result<Self, AutofocusError> {
        config.validate()?;
        Ok(Self {
            search: config.search.clone(),
            timing: config.timing.clone(),
            sleeper,
        })
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }

    /// Run the full search and summarize it.
    ///
    /// Never fails: faults end up in `failure_reason`.
    pub fn run<M, F>(
        &self,
        camera: &CameraHandle,
        actuator: &mut FocusActuator<'_, M>,
        frames: &mut F,
    ) -> SearchResult
    where
        M: FocusMotor,
        F: FrameSource + ?Sized,
    {
        let started = Instant::now();
        let mut state = SearchState::default();
        let mut trace = Trace::default();

        log::info!("Starting focus search on {}", camera);
        let outcome = self.execute(&mut state, &mut trace, actuator, frames);
        state.current_position = actuator.position();

        let failure_reason = match outcome {
            Ok(()) => {
                state.phase = if state.converged {
                    SearchPhase::Converged
                } else {
                    SearchPhase::Exhausted
                };
                None
            }
            Err(abort) => {
                state.phase = SearchPhase::Aborted;
                state.converged = false;
                match &abort {
                    SearchAbort::Device(err) => {
                        log::error!("Focus search aborted on {}: {}", camera, err)
                    }
                    SearchAbort::NoSamples => log::error!(
                        "Focus search aborted on {}: no frame could be scored in the coarse sweep",
                        camera
                    ),
                }
                Some(abort.reason())
            }
        };

        let result = SearchResult {
            camera_id: camera.mcam_id,
            host: camera.endpoint.host.clone(),
            final_position: state.current_position,
            final_metric: state.global_best_metric,
            converged: state.converged,
            failure_reason,
            coarse_best_index: state.global_best_position,
            fine_iterations: trace.fine_iterations,
            skipped_samples: trace.skipped,
            samples: trace.samples,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        log::info!(
            "{}: {:?} at position {} (metric {:.4}, coarse best {}, {} fine iterations, {} skipped)",
            camera,
            state.phase,
            result.final_position,
            result.final_metric,
            result.coarse_best_index,
            result.fine_iterations,
            result.skipped_samples
        );
        result
    }

    fn execute<M, F>(
        &self,
        state: &mut SearchState,
        trace: &mut Trace,
        actuator: &mut FocusActuator<'_, M>,
        frames: &mut F,
    ) -> Result<(), SearchAbort>
    where
        M: FocusMotor,
        F: FrameSource + ?Sized,
    {
        state.phase = SearchPhase::Homing;
        self.home(actuator)?;
        state.current_position = actuator.position();

        state.phase = SearchPhase::CoarseSweep;
        self.coarse_sweep(state, trace, actuator, frames)?;

        state.phase = SearchPhase::Repositioning;
        self.reposition(state, trace, actuator, frames)?;

        state.phase = SearchPhase::FineSweep;
        self.fine_sweep(state, trace, actuator, frames)?;
        Ok(())
    }

    fn home<M: FocusMotor>(&self, actuator: &mut FocusActuator<'_, M>) -> Result<(), AutofocusError> {
        let passes = if self.search.double_home { 2 } else { 1 };
        for _ in 0..passes {
            match self.search.homing {
                HomingMode::ZeroStep => actuator.home()?,
                HomingMode::FullTravel => {
                    actuator.move_near(self.search.total_range)?;
                    actuator.rezero();
                }
            }
        }
        log::debug!("Homed with {:?} ({} pass(es))", self.search.homing, passes);
        self.sleeper.sleep(self.timing.home_settle());
        Ok(())
    }

    fn coarse_sweep<M, F>(
        &self,
        state: &mut SearchState,
        trace: &mut Trace,
        actuator: &mut FocusActuator<'_, M>,
        frames: &mut F,
    ) -> Result<(), SearchAbort>
    where
        M: FocusMotor,
        F: FrameSource + ?Sized,
    {
        let iterations = self.search.coarse_iterations();
        let mut scored = 0u32;

        for iteration in 0..iterations {
            let outcome = frames.acquire_latest_frame().map(|sample| sample.metric);
            trace.record(state, iteration, actuator.position(), &outcome);

            match outcome {
                Ok(metric) => {
                    scored += 1;
                    state.observe_coarse(iteration, metric);
                    log::debug!(
                        "Coarse {}/{} at {}: metric {:.4} (best {:.4} @ {})",
                        iteration + 1,
                        iterations,
                        actuator.position(),
                        metric,
                        state.global_best_metric,
                        state.global_best_position
                    );
                }
                Err(failure) => log::warn!(
                    "Coarse {}/{} at {}: sample skipped ({})",
                    iteration + 1,
                    iterations,
                    actuator.position(),
                    failure
                ),
            }

            actuator.move_far(self.search.coarse_step)?;
            state.current_position = actuator.position();
        }

        if scored == 0 {
            return Err(SearchAbort::NoSamples);
        }
        log::info!(
            "Coarse sweep done: best metric {:.4} at iteration {}",
            state.global_best_metric,
            state.global_best_position
        );
        Ok(())
    }

    fn reposition<M, F>(
        &self,
        state: &mut SearchState,
        trace: &mut Trace,
        actuator: &mut FocusActuator<'_, M>,
        frames: &mut F,
    ) -> Result<(), SearchAbort>
    where
        M: FocusMotor,
        F: FrameSource + ?Sized,
    {
        let target = i64::from(state.global_best_position) * i64::from(self.search.coarse_step);
        log::debug!(
            "Backing off {} steps to {}",
            actuator.position() - target,
            target
        );
        actuator.move_to(target)?;
        state.current_position = actuator.position();
        self.sleeper.sleep(self.timing.reposition_settle());

        state.previous_metric = 0.0;
        for attempt in 0..self.search.reseed_attempts {
            let outcome = frames.acquire_latest_frame().map(|sample| sample.metric);
            trace.record(state, attempt, actuator.position(), &outcome);
            match outcome {
                Ok(metric) => {
                    state.previous_metric = metric;
                    log::debug!("Reseeded previous metric with {:.4}", metric);
                    return Ok(());
                }
                Err(failure) => log::warn!("Reseed attempt {} failed ({})", attempt + 1, failure),
            }
        }
        log::warn!("Could not reseed after repositioning, starting fine sweep from 0.0");
        Ok(())
    }

    fn fine_sweep<M, F>(
        &self,
        state: &mut SearchState,
        trace: &mut Trace,
        actuator: &mut FocusActuator<'_, M>,
        frames: &mut F,
    ) -> Result<(), SearchAbort>
    where
        M: FocusMotor,
        F: FrameSource + ?Sized,
    {
        let step = self.search.fine_step;

        for iteration in 0..self.search.fine_iterations {
            actuator.move_near(step)?;
            state.current_position = actuator.position();
            trace.fine_iterations += 1;

            let outcome = frames.acquire_latest_frame().map(|sample| sample.metric);
            trace.record(state, iteration, actuator.position(), &outcome);

            let metric = match outcome {
                Ok(metric) => metric,
                Err(failure) => {
                    log::warn!(
                        "Fine {}/{} at {}: sample skipped ({})",
                        iteration + 1,
                        self.search.fine_iterations,
                        actuator.position(),
                        failure
                    );
                    continue;
                }
            };

            log::debug!(
                "Fine {}/{} at {}: metric {:.4} (previous {:.4})",
                iteration + 1,
                self.search.fine_iterations,
                actuator.position(),
                metric,
                state.previous_metric
            );

            if state.observe_fine(metric) {
                // One step past the peak; step back onto it.
                actuator.move_far(step)?;
                state.current_position = actuator.position();
                log::info!("Converged at {} after {} fine iterations", state.current_position, iteration + 1);
                return Ok(());
            }
        }

        log::info!(
            "Fine sweep budget of {} exhausted without convergence",
            self.search.fine_iterations
        );
        Ok(())
    }
}
