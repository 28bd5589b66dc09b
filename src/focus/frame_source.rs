use crate::api::{decode_image, MantisApi};
use crate::errors::AcquisitionFailure;
use crate::sharpness::SharpnessScorer;
use crate::types::{FrameBuffer, FrameSample};
use std::time::Duration;

/// Supplier of scored frames for one camera.
pub trait FrameSource {
    /// Grab, decode and score the most recent frame.
    ///
    /// Failures are returned, never raised; callers skip the sample.
    fn acquire_latest_frame(&mut self) -> Result<FrameSample, AcquisitionFailure>;
}

/// Scoped ownership of a transport frame buffer.
///
/// The buffer goes back to the transport when the guard drops, whichever
/// way the caller leaves.
pub struct FrameGuard<'a, A: MantisApi + ?Sized> {
    api: &'a A,
    buffer: Option<FrameBuffer>,
}

impl<'a, A: MantisApi + ?Sized> FrameGuard<'a, A> {
    pub fn new(api: &'a A, buffer: FrameBuffer) -> Self {
        Self {
            api,
            buffer: Some(buffer),
        }
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_ref().map(|b| b.data.as_ref()).unwrap_or(&[])
    }

    pub fn timestamp_us(&self) -> u64 {
        self.buffer.as_ref().map(|b| b.timestamp_us).unwrap_or(0)
    }
}

impl<A: MantisApi + ?Sized> Drop for FrameGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let buffer_id = buffer.buffer_id;
            if !self.api.release_frame_buffer(buffer) {
                log::warn!("Failed to release frame buffer {}", buffer_id);
            }
        }
    }
}

/// Frame source reading a microcamera stream through the vendor API.
pub struct StreamFrameSource<'a, A: MantisApi + ?Sized> {
    api: &'a A,
    stream_port: u16,
    grab_timeout: Duration,
    scorer: &'a dyn SharpnessScorer,
    failures: u64,
}

impl<'a, A: MantisApi + ?Sized> StreamFrameSource<'a, A> {
    pub fn new(
        api: &'a A,
        stream_port: u16,
        grab_timeout: Duration,
        scorer: &'a dyn SharpnessScorer,
    ) -> Self {
        Self {
            api,
            stream_port,
            grab_timeout,
            scorer,
            failures: 0,
        }
    }

    pub fn stream_port(&self) -> u16 {
        self.stream_port
    }

    /// Acquisition failures seen so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn acquire(&self) -> Result<FrameSample, AcquisitionFailure> {
        let buffer = self
            .api
            .grab_frame(self.stream_port, self.grab_timeout)
            .ok_or(AcquisitionFailure::GrabTimeout)?;
        let guard = FrameGuard::new(self.api, buffer);

        let image = decode_image(guard.data()).ok_or(AcquisitionFailure::DecodeFailed)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(AcquisitionFailure::EmptyImage);
        }

        let metric = self.scorer.score_image(&image);
        if !metric.is_finite() || metric < 0.0 {
            return Err(AcquisitionFailure::InvalidMetric);
        }

        Ok(FrameSample::new(image, metric, guard.timestamp_us()))
    }
}

impl<A: MantisApi + ?Sized> FrameSource for StreamFrameSource<'_, A> {
    fn acquire_latest_frame(&mut self) -> Result<FrameSample, AcquisitionFailure> {
        let result = self.acquire();
        match &result {
            Ok(sample) => log::debug!(
                "Port {}: scored frame {}x{} metric {:.4}",
                self.stream_port,
                sample.image.width(),
                sample.image.height(),
                sample.metric
            ),
            Err(failure) => {
                self.failures += 1;
                log::warn!("Port {}: {}", self.stream_port, failure);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharpness::CannyScorer;
    use crate::testing::SimulatedMantis;
    use crate::types::HostEndpoint;

    fn started_sim() -> (SimulatedMantis, crate::types::CameraHandle) {
        let sim = SimulatedMantis::builder().host("10.0.0.1", &[(1, 1200)]).build();
        let conn = sim.connect(&HostEndpoint::new("10.0.0.1", 9999)).unwrap();
        let camera = sim.list_microcameras(&conn).unwrap().remove(0);
        assert!(sim.start_stream(&camera, 13000));
        (sim, camera)
    }

    #[test]
    fn test_acquire_scores_and_releases() {
        let (sim, _camera) = started_sim();
        let scorer = CannyScorer::default();
        let mut source = StreamFrameSource::new(&sim, 13000, Duration::from_millis(50), &scorer);

        let sample = source.acquire_latest_frame().unwrap();
        assert!(sample.metric >= 0.0);
        assert_eq!(sim.outstanding_buffers(), 0);
        assert_eq!(sim.frames_grabbed(), 1);
    }

    #[test]
    fn test_decode_failure_still_releases_buffer() {
        let (sim, camera) = started_sim();
        sim.corrupt_next_frames(camera.mcam_id, 2);
        let scorer = CannyScorer::default();
        let mut source = StreamFrameSource::new(&sim, 13000, Duration::from_millis(50), &scorer);

        assert_eq!(
            source.acquire_latest_frame().unwrap_err(),
            AcquisitionFailure::DecodeFailed
        );
        assert_eq!(
            source.acquire_latest_frame().unwrap_err(),
            AcquisitionFailure::DecodeFailed
        );
        assert!(source.acquire_latest_frame().is_ok());
        assert_eq!(source.failures(), 2);
        assert_eq!(sim.outstanding_buffers(), 0);
    }

    #[test]
    fn test_unstreamed_port_times_out() {
        let (sim, _camera) = started_sim();
        let scorer = CannyScorer::default();
        let mut source = StreamFrameSource::new(&sim, 14000, Duration::from_millis(5), &scorer);

        assert_eq!(
            source.acquire_latest_frame().unwrap_err(),
            AcquisitionFailure::GrabTimeout
        );
    }
}
