/// Multi-Camera Orchestrator
///
/// Runs the focus search over every microcamera of a set of hosts:
/// 1. Connect to each host and enumerate its microcameras
/// 2. Give every camera its own stream port (`stream_port_base + index`)
/// 3. Schedule per-camera searches according to the execution mode
/// 4. Collect one result per camera, then release streams and connections
///
/// Faults stay with the camera (or host) that raised them. Nothing, not
/// even a panicking worker, escapes [`Orchestrator::run_autofocus`].
pub mod guards;
pub mod report;

pub use guards::{ConnectionGuard, StreamGuard};
pub use report::{AutofocusReport, HostReport};

use crate::api::MantisApi;
use crate::config::{AutofocusConfig, ExecutionMode};
use crate::errors::{AutofocusError, FailureReason};
use crate::focus::{FocusActuator, FocusSearch, McamMotor, StreamFrameSource};
use crate::sharpness::{build_scorer, SharpnessScorer};
use crate::timing::{CancelToken, Sleeper, ThreadSleeper};
use crate::types::{CameraHandle, HostEndpoint, SearchResult};
use chrono::Utc;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

/// One camera scheduled in a run.
#[derive(Debug, Clone)]
struct CameraJob {
    /// Position in the run; also the stream port offset.
    index: usize,
    camera: CameraHandle,
}

pub struct Orchestrator<A: MantisApi + ?Sized> {
    api: Arc<A>,
    scorer: Arc<dyn SharpnessScorer>,
    sleeper: Arc<dyn Sleeper>,
    config: AutofocusConfig,
    cancel: CancelToken,
}

impl<A: MantisApi + ?Sized> Orchestrator<A> {
    /// Orchestrator using the configured scorer and real sleeps.
    pub fn new(api: Arc<A>, config: AutofocusConfig) -> Result<Self, AutofocusError> {
        config.validate()?;
        Ok(Self {
            api,
            scorer: build_scorer(&config.scorer),
            sleeper: Arc::new(ThreadSleeper),
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SharpnessScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &AutofocusConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.orchestrator.mode
    }

    /// Focus every microcamera of every host.
    ///
    /// Repeated endpoints are visited once, in first-seen order.
    pub fn run_autofocus(&self, hosts: &[HostEndpoint]) -> AutofocusReport {
        let hosts = unique_endpoints(hosts);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!(
            "Autofocus run {} over {} host(s) in {:?} mode",
            run_id,
            hosts.len(),
            self.mode()
        );

        let mut sessions = Vec::with_capacity(hosts.len());
        let mut jobs = Vec::new();
        let mut owners = Vec::new();
        for (host_index, endpoint) in hosts.iter().enumerate() {
            let session = match self.open_host(endpoint) {
                Ok((guard, cameras)) => {
                    for camera in cameras {
                        owners.push(host_index);
                        jobs.push(CameraJob {
                            index: jobs.len(),
                            camera,
                        });
                    }
                    (Some(guard), None)
                }
                Err(e) => {
                    log::error!("Skipping host {}: {}", endpoint, e);
                    (None, Some(e.to_string()))
                }
            };
            sessions.push(session);
        }

        let results = self.execute(&jobs);

        let mut reports: Vec<HostReport> = hosts
            .iter()
            .zip(sessions.iter())
            .map(|(endpoint, (_, error))| HostReport {
                host: endpoint.clone(),
                connection_error: error.clone(),
                results: Vec::new(),
            })
            .collect();
        for (owner, result) in owners.into_iter().zip(results) {
            reports[owner].results.push(result);
        }

        // Every worker has finished; connections can go.
        drop(sessions);

        let report = AutofocusReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            mode: self.mode(),
            hosts: reports,
        };
        log::info!(
            "Autofocus run {} finished: {}/{} camera(s) converged, {} fault(s), {} unreachable host(s)",
            run_id,
            report.converged_count(),
            report.camera_count(),
            report.fault_count(),
            report.unreachable_hosts().count()
        );
        report
    }

    /// Focus cameras on connections the caller already owns.
    ///
    /// Results come back in input order.
    pub fn run_cameras(&self, cameras: &[CameraHandle]) -> Vec<SearchResult> {
        let jobs: Vec<CameraJob> = cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| CameraJob {
                index,
                camera: camera.clone(),
            })
            .collect();
        self.execute(&jobs)
    }

    fn open_host<'a>(
        &'a self,
        endpoint: &HostEndpoint,
    ) -> Result<(ConnectionGuard<'a, A>, Vec<CameraHandle>), AutofocusError> {
        let guard = ConnectionGuard::connect(&*self.api, endpoint)?;
        let cameras = guard.list_microcameras()?;
        log::info!("{} has {} microcamera(s)", endpoint, cameras.len());
        Ok((guard, cameras))
    }

    /// Run all jobs under the configured mode; results in job order.
    fn execute(&self, jobs: &[CameraJob]) -> Vec<SearchResult> {
        let mut results: Vec<(usize, SearchResult)> = match self.mode() {
            ExecutionMode::Sequential => jobs.iter().map(|job| (job.index, self.run_job(job))).collect(),
            ExecutionMode::PerHost => self.run_workers(group_by_endpoint(jobs)),
            ExecutionMode::Concurrent => {
                let groups = jobs
                    .iter()
                    .map(|job| (format!("mcam-{}", job.camera.mcam_id), vec![job]))
                    .collect();
                self.run_workers(groups)
            }
        };
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// One scoped worker thread per group; each runs its jobs in order.
    fn run_workers(&self, groups: Vec<(String, Vec<&CameraJob>)>) -> Vec<(usize, SearchResult)> {
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(groups.len());
            let mut results = Vec::new();

            for (name, group) in groups {
                let spawned = thread::Builder::new()
                    .name(format!("af-{}", name))
                    .spawn_scoped(scope, {
                        let group = group.clone();
                        move || {
                            group
                                .iter()
                                .map(|job| (job.index, self.run_job(job)))
                                .collect::<Vec<_>>()
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push((group, handle)),
                    Err(e) => {
                        log::warn!("Could not spawn worker {}: {}; running inline", name, e);
                        results.extend(group.iter().map(|job| (job.index, self.run_job(job))));
                    }
                }
            }

            for (group, handle) in handles {
                match handle.join() {
                    Ok(worker_results) => results.extend(worker_results),
                    Err(_) => {
                        log::error!("Focus worker died; marking its cameras as failed");
                        results.extend(group.iter().map(|job| {
                            (job.index, SearchResult::failed(&job.camera, FailureReason::Internal))
                        }));
                    }
                }
            }
            results
        })
    }

    /// Search one camera, containing any panic to that camera.
    fn run_job(&self, job: &CameraJob) -> SearchResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_camera(job))) {
            Ok(result) => result,
            Err(_) => {
                log::error!("Focus search on {} panicked", job.camera);
                SearchResult::failed(&job.camera, FailureReason::Internal)
            }
        }
    }

    fn run_camera(&self, job: &CameraJob) -> SearchResult {
        let camera = &job.camera;
        if self.cancel.is_cancelled() {
            return SearchResult::failed(camera, FailureReason::Cancelled);
        }

        let base = self.config.orchestrator.stream_port_base;
        let Some(port) = u16::try_from(job.index)
            .ok()
            .and_then(|offset| base.checked_add(offset))
        else {
            log::error!("No stream port left for {} (index {})", camera, job.index);
            return SearchResult::failed(camera, FailureReason::StreamFault);
        };

        let engine = match FocusSearch::new(&self.config, &*self.sleeper) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Cannot build focus search for {}: {}", camera, e);
                return SearchResult::failed(camera, FailureReason::Internal);
            }
        };

        let api = &*self.api;
        let _stream = match StreamGuard::start(api, camera, port) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("{}", e);
                return SearchResult::failed(camera, e.failure_reason());
            }
        };

        let timing = &self.config.timing;
        let mut actuator = FocusActuator::new(
            McamMotor::new(api, camera),
            timing.move_settle(),
            &*self.sleeper,
            &self.cancel,
        );
        let mut frames = StreamFrameSource::new(api, port, timing.grab_timeout(), &*self.scorer);

        engine.run(camera, &mut actuator, &mut frames)
    }
}

/// One group per host endpoint, in first-seen order.
fn group_by_endpoint(jobs: &[CameraJob]) -> Vec<(String, Vec<&CameraJob>)> {
    let mut groups: Vec<(&HostEndpoint, Vec<&CameraJob>)> = Vec::new();
    for job in jobs {
        let endpoint = &job.camera.endpoint;
        match groups.iter_mut().find(|(e, _)| *e == endpoint) {
            Some((_, group)) => group.push(job),
            None => groups.push((endpoint, vec![job])),
        }
    }
    groups
        .into_iter()
        .map(|(endpoint, group)| (endpoint.to_string(), group))
        .collect()
}

/// Drop repeated endpoints, keeping the first occurrence of each.
fn unique_endpoints(hosts: &[HostEndpoint]) -> Vec<HostEndpoint> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(hosts.len());
    for endpoint in hosts {
        if seen.insert(endpoint) {
            unique.push(endpoint.clone());
        } else {
            log::warn!("Ignoring repeated host {}", endpoint);
        }
    }
    unique
}
