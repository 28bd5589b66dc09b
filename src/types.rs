//! Core data types shared by the adapters, the search engine and the
//! orchestrator.

use crate::errors::FailureReason;
use bytes::Bytes;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default control port of the camera-management service on each host.
pub const DEFAULT_CONTROL_PORT: u16 = 9999;

/// Transport endpoint of one Tegra host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub host: String,
    pub port: u16,
}

impl HostEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Session with one host, returned by `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: u64,
    pub endpoint: HostEndpoint,
}

/// One addressable microcamera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraHandle {
    pub mcam_id: u32,
    pub endpoint: HostEndpoint,
}

impl CameraHandle {
    pub fn new(mcam_id: u32, endpoint: HostEndpoint) -> Self {
        Self { mcam_id, endpoint }
    }
}

impl fmt::Display for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mcam {} @ {}", self.mcam_id, self.endpoint)
    }
}

/// Focus position in motor steps relative to the last home.
pub type FocusPosition = i64;

/// Compressed frame as handed out by the transport.
///
/// Must be returned with `release_frame_buffer` once consumed.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub buffer_id: u64,
    pub mcam_id: u32,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
    pub data: Bytes,
}

/// A decoded frame together with its sharpness score.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub image: DynamicImage,
    pub metric: f64,
    pub timestamp_us: u64,
}

impl FrameSample {
    pub fn new(image: DynamicImage, metric: f64, timestamp_us: u64) -> Self {
        Self {
            image,
            metric,
            timestamp_us,
        }
    }
}

/// Phase of a single camera's focus search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Homing,
    CoarseSweep,
    Repositioning,
    FineSweep,
    Converged,
    Exhausted,
    Aborted,
}

impl SearchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Aborted)
    }
}

/// Mutable per-camera search state.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub phase: SearchPhase,
    pub current_position: FocusPosition,
    pub previous_metric: f64,
    pub local_best_metric: f64,
    pub global_best_metric: f64,
    /// Coarse iteration index (1-based) of the best sample, 0 if none.
    pub global_best_position: u32,
    pub converged: bool,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            phase: SearchPhase::Homing,
            current_position: 0,
            previous_metric: 0.0,
            local_best_metric: 0.0,
            global_best_metric: 0.0,
            global_best_position: 0,
            converged: false,
        }
    }
}

/// One point of the measured focus curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub phase: SearchPhase,
    pub iteration: u32,
    pub position: FocusPosition,
    /// `None` when the sample was skipped after an acquisition failure.
    pub metric: Option<f64>,
    /// Value of `previous_metric` when the sample was evaluated.
    pub previous_metric: f64,
}

/// Final outcome of one camera's search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub camera_id: u32,
    pub host: String,
    pub final_position: FocusPosition,
    pub final_metric: f64,
    pub converged: bool,
    pub failure_reason: Option<FailureReason>,
    pub coarse_best_index: u32,
    pub fine_iterations: u32,
    pub skipped_samples: u32,
    pub samples: Vec<SampleRecord>,
    pub elapsed_ms: u64,
}

impl SearchResult {
    /// Result for a camera whose search never started or did not finish.
    ///
    /// `final_position` is 0 and carries no reading. When the search was
    /// cut short (a panicking worker) the lens may have moved, and its
    /// position is unknown until the camera is homed again.
    pub fn failed(camera: &CameraHandle, reason: FailureReason) -> Self {
        Self {
            camera_id: camera.mcam_id,
            host: camera.endpoint.host.clone(),
            final_position: 0,
            final_metric: 0.0,
            converged: false,
            failure_reason: Some(reason),
            coarse_best_index: 0,
            fine_iterations: 0,
            skipped_samples: 0,
            samples: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.failure_reason.is_some()
    }
}
