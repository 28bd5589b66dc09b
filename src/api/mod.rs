//! Boundary to the vendor camera API
//!
//! The Mantis library is closed source; everything the controller needs from
//! it is expressed by [`MantisApi`]. The status-style signatures (`bool`,
//! `Option`) mirror the vendor calls; the adapters in [`crate::focus`] turn
//! them into typed results.

use crate::errors::AutofocusError;
use crate::types::{CameraHandle, ConnectionHandle, FrameBuffer, HostEndpoint};
use image::DynamicImage;
use std::time::Duration;

/// Operations consumed from the external camera-management API.
///
/// Implementations must be safe to call from several worker threads; whether
/// concurrent streams per host are supported is a property of the transport
/// and is selected through the orchestrator's execution mode.
pub trait MantisApi: Send + Sync {
    fn connect(&self, endpoint: &HostEndpoint) -> Result<ConnectionHandle, AutofocusError>;

    fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), AutofocusError>;

    fn list_microcameras(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<Vec<CameraHandle>, AutofocusError>;

    fn start_stream(&self, camera: &CameraHandle, stream_port: u16) -> bool;

    fn stop_stream(&self, camera: &CameraHandle, stream_port: u16) -> bool;

    /// Most recent frame on `stream_port`, or `None` on timeout.
    fn grab_frame(&self, stream_port: u16, timeout: Duration) -> Option<FrameBuffer>;

    fn release_frame_buffer(&self, buffer: FrameBuffer) -> bool;

    fn focus_step_near(&self, camera: &CameraHandle, steps: u32) -> bool;

    fn focus_step_far(&self, camera: &CameraHandle, steps: u32) -> bool;
}

/// Decode a compressed (JPEG/PNG) frame payload.
pub fn decode_image(bytes: &[u8]) -> Option<DynamicImage> {
    if bytes.is_empty() {
        return None;
    }
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image),
        Err(e) => {
            log::debug!("Frame decode failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_decode_png_roundtrip_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 4));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();

        let decoded = decode_image(buf.get_ref()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn test_decode_garbage_returns_none() {
        assert!(decode_image(&[]).is_none());
        assert!(decode_image(&[0xde, 0xad, 0xbe, 0xef]).is_none());
    }
}
