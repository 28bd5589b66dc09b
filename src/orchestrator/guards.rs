//! Scoped ownership of host connections and camera streams.

use crate::api::MantisApi;
use crate::errors::AutofocusError;
use crate::types::{CameraHandle, ConnectionHandle, HostEndpoint};

/// Open host session, disconnected on drop.
pub struct ConnectionGuard<'a, A: MantisApi + ?Sized> {
    api: &'a A,
    handle: ConnectionHandle,
}

impl<'a, A: MantisApi + ?Sized> ConnectionGuard<'a, A> {
    pub fn connect(api: &'a A, endpoint: &HostEndpoint) -> Result<Self, AutofocusError> {
        let handle = api.connect(endpoint)?;
        log::info!("Connected to {}", endpoint);
        Ok(Self { api, handle })
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn list_microcameras(&self) -> Result<Vec<CameraHandle>, AutofocusError> {
        self.api.list_microcameras(&self.handle)
    }
}

impl<A: MantisApi + ?Sized> Drop for ConnectionGuard<'_, A> {
    fn drop(&mut self) {
        match self.api.disconnect(&self.handle) {
            Ok(()) => log::info!("Disconnected from {}", self.handle.endpoint),
            Err(e) => log::warn!("Disconnect from {} failed: {}", self.handle.endpoint, e),
        }
    }
}

/// Running camera stream, stopped on drop.
pub struct StreamGuard<'a, A: MantisApi + ?Sized> {
    api: &'a A,
    camera: &'a CameraHandle,
    port: u16,
}

impl<'a, A: MantisApi + ?Sized> StreamGuard<'a, A> {
    pub fn start(api: &'a A, camera: &'a CameraHandle, port: u16) -> Result<Self, AutofocusError> {
        if !api.start_stream(camera, port) {
            return Err(AutofocusError::StreamFault {
                mcam_id: camera.mcam_id,
                port,
                message: "start_stream rejected".to_string(),
            });
        }
        log::debug!("Streaming {} on port {}", camera, port);
        Ok(Self { api, camera, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl<A: MantisApi + ?Sized> Drop for StreamGuard<'_, A> {
    fn drop(&mut self) {
        if !self.api.stop_stream(self.camera, self.port) {
            log::warn!("Failed to stop stream of {} on port {}", self.camera, self.port);
        }
    }
}
