//! mcam-autofocus: closed-loop autofocus for Mantis microcamera arrays
//!
//! Sweeps each microcamera's focus motor, scores frames with an edge-based
//! sharpness metric and converges on the best focus position, across many
//! cameras and hosts at once.
//!
//! # Features
//! - Coarse-to-fine hill-climbing focus search per camera
//! - Canny edge-density and Laplacian sharpness metrics
//! - Sequential, per-host or fully concurrent scheduling
//! - Per-camera fault isolation with structured run reports
//! - Position tracking over relative-only focus motors
//! - Offline simulator for tests and demos
//!
//! # Usage
//! ```rust,ignore
//! use mcam_autofocus::{AutofocusConfig, Orchestrator};
//! use std::sync::Arc;
//!
//! let config = AutofocusConfig::load_or_default();
//! let hosts = config.orchestrator.endpoints()?;
//! let orchestrator = Orchestrator::new(Arc::new(my_mantis_binding), config)?;
//! let report = orchestrator.run_autofocus(&hosts);
//! println!("{}", report.to_json_pretty()?);
//! ```
pub mod api;
pub mod config;
pub mod errors;
pub mod focus;
pub mod invariant_ppt;
pub mod orchestrator;
pub mod sharpness;
pub mod timing;
pub mod types;

// Testing utilities - simulator and scripted doubles for offline testing
pub mod testing;

// Re-exports for convenience
pub use api::{decode_image, MantisApi};
pub use config::{AutofocusConfig, ExecutionMode, HomingMode, ScorerKind};
pub use errors::{AcquisitionFailure, AutofocusError, FailureReason};
pub use focus::{FocusActuator, FocusAssist, FocusSearch, FrameSource, LatestFrameSlot};
pub use orchestrator::{AutofocusReport, HostReport, Orchestrator};
pub use sharpness::{build_scorer, CannyScorer, LaplacianScorer, SharpnessScorer};
pub use timing::{CancelToken, Sleeper, ThreadSleeper};
pub use types::{
    CameraHandle, ConnectionHandle, FocusPosition, FrameBuffer, FrameSample, HostEndpoint,
    SampleRecord, SearchPhase, SearchResult, SearchState,
};

/// Initialize logging for the autofocus controller
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "mcam_autofocus=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "mcam-autofocus");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
    }
}
