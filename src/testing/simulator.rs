//! In-process Mantis simulator
//!
//! Implements [`MantisApi`] over a set of virtual hosts and microcameras.
//! Each camera has a lens position and a best-focus position; frames are the
//! synthetic focus chart blurred in proportion to the defocus, PNG-encoded
//! like a real compressed frame. Stream ports hand frames over through a
//! [`LatestFrameSlot`], so a grab always sees the newest frame.
//!
//! Fault injection covers unreachable hosts, rejected focus commands,
//! corrupt frames and streams that refuse to start. Resource counters let
//! tests prove every buffer, stream and connection was given back.

use super::synthetic_data::{defocused_target, encode_png};
use crate::api::MantisApi;
use crate::errors::AutofocusError;
use crate::focus::LatestFrameSlot;
use crate::types::{CameraHandle, ConnectionHandle, FrameBuffer, HostEndpoint};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const FRAME_INTERVAL_US: u64 = 33_333;

/// Defocus (steps) still rendered perfectly sharp.
const DEPTH_OF_FIELD: u32 = 20;
/// Steps of defocus per pixel of blur sigma.
const STEPS_PER_SIGMA: f32 = 40.0;

#[derive(Debug, Clone)]
struct SimCamera {
    best_position: u32,
    lens: u32,
    stream_port: Option<u16>,
    commands: u32,
    fail_after: Option<u32>,
    corrupt_pending: u32,
    refuse_stream: bool,
}

#[derive(Debug, Default)]
struct SimHost {
    reachable: bool,
    cameras: Vec<u32>,
}

#[derive(Default)]
struct SimState {
    hosts: HashMap<String, SimHost>,
    cameras: HashMap<(String, u32), SimCamera>,
    ports: HashMap<u16, ((String, u32), Arc<LatestFrameSlot<FrameBuffer>>)>,
    connections: HashSet<u64>,
    outstanding: HashSet<u64>,
    next_connection: u64,
    next_buffer: u64,
    frame_clock: u64,
    frames_grabbed: u64,
    streams_started: u64,
    connections_opened: u64,
}

/// Builder for [`SimulatedMantis`].
#[derive(Debug, Clone)]
pub struct SimulatedMantisBuilder {
    hosts: Vec<(String, bool, Vec<(u32, u32)>)>,
    width: u32,
    height: u32,
    travel: u32,
    start_lens: u32,
}

impl Default for SimulatedMantisBuilder {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            width: 64,
            height: 48,
            travel: 2200,
            start_lens: 700,
        }
    }
}

impl SimulatedMantisBuilder {
    /// Reachable host with `(mcam_id, best_focus_position)` cameras.
    pub fn host(mut self, host: &str, cameras: &[(u32, u32)]) -> Self {
        self.hosts.push((host.to_string(), true, cameras.to_vec()));
        self
    }

    /// Host that refuses connections.
    pub fn unreachable_host(mut self, host: &str) -> Self {
        self.hosts.push((host.to_string(), false, Vec::new()));
        self
    }

    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Mechanical travel of every lens, in steps.
    pub fn travel(mut self, steps: u32) -> Self {
        self.travel = steps;
        self
    }

    /// Lens position before the first command.
    pub fn start_lens(mut self, steps: u32) -> Self {
        self.start_lens = steps;
        self
    }

    pub fn build(self) -> SimulatedMantis {
        let mut state = SimState::default();
        for (host, reachable, cameras) in self.hosts {
            let entry = state.hosts.entry(host.clone()).or_default();
            entry.reachable = reachable;
            for (mcam_id, best_position) in cameras {
                entry.cameras.push(mcam_id);
                state.cameras.insert(
                    (host.clone(), mcam_id),
                    SimCamera {
                        best_position: best_position.min(self.travel),
                        lens: self.start_lens.min(self.travel),
                        stream_port: None,
                        commands: 0,
                        fail_after: None,
                        corrupt_pending: 0,
                        refuse_stream: false,
                    },
                );
            }
        }
        SimulatedMantis {
            state: Mutex::new(state),
            width: self.width,
            height: self.height,
            travel: self.travel,
        }
    }
}

/// Simulated camera-management service.
pub struct SimulatedMantis {
    state: Mutex<SimState>,
    width: u32,
    height: u32,
    travel: u32,
}

impl SimulatedMantis {
    pub fn builder() -> SimulatedMantisBuilder {
        SimulatedMantisBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn camera_key(camera: &CameraHandle) -> (String, u32) {
        (camera.endpoint.host.clone(), camera.mcam_id)
    }

    fn find_key(state: &SimState, mcam_id: u32) -> Option<(String, u32)> {
        state.cameras.keys().find(|(_, id)| *id == mcam_id).cloned()
    }

    /// Render the current view of a camera as a compressed frame.
    fn render(&self, state: &mut SimState, key: &(String, u32)) -> Option<FrameBuffer> {
        let camera = state.cameras.get(key)?;
        let defocus = camera.lens.abs_diff(camera.best_position);
        let sigma = if defocus <= DEPTH_OF_FIELD {
            0.0
        } else {
            defocus as f32 / STEPS_PER_SIGMA
        };
        let data = match encode_png(&defocused_target(self.width, self.height, sigma)) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                log::warn!("Simulator failed to encode frame: {}", e);
                Bytes::new()
            }
        };

        state.next_buffer += 1;
        state.frame_clock += FRAME_INTERVAL_US;
        Some(FrameBuffer {
            buffer_id: state.next_buffer,
            mcam_id: key.1,
            width: self.width,
            height: self.height,
            timestamp_us: state.frame_clock,
            data,
        })
    }

    /// Push a fresh frame to the camera's stream, if it is streaming.
    fn publish(&self, state: &mut SimState, key: &(String, u32)) {
        let Some(port) = state.cameras.get(key).and_then(|c| c.stream_port) else {
            return;
        };
        let Some(slot) = state.ports.get(&port).map(|(_, slot)| slot.clone()) else {
            return;
        };
        if let Some(frame) = self.render(state, key) {
            slot.publish(frame);
        }
    }

    fn step(&self, camera: &CameraHandle, signed: i64) -> bool {
        let key = Self::camera_key(camera);
        let mut state = self.lock();
        let travel = i64::from(self.travel);
        let Some(cam) = state.cameras.get_mut(&key) else {
            log::warn!("Simulator: focus command for unknown {}", camera);
            return false;
        };

        if cam.fail_after.is_some_and(|n| cam.commands >= n) {
            return false;
        }
        cam.commands += 1;
        cam.lens = if signed == 0 {
            0
        } else {
            (i64::from(cam.lens) + signed).clamp(0, travel) as u32
        };

        self.publish(&mut state, &key);
        true
    }

    /// Reject every focus command of `mcam_id` after `n` accepted ones.
    pub fn fail_actuator_after(&self, mcam_id: u32, n: u32) {
        let mut state = self.lock();
        if let Some(key) = Self::find_key(&state, mcam_id) {
            if let Some(cam) = state.cameras.get_mut(&key) {
                cam.fail_after = Some(n);
            }
        }
    }

    /// Corrupt the payload of the next `n` frames grabbed from `mcam_id`.
    pub fn corrupt_next_frames(&self, mcam_id: u32, n: u32) {
        let mut state = self.lock();
        if let Some(key) = Self::find_key(&state, mcam_id) {
            if let Some(cam) = state.cameras.get_mut(&key) {
                cam.corrupt_pending += n;
            }
        }
    }

    /// Make `start_stream` fail for `mcam_id`.
    pub fn refuse_stream(&self, mcam_id: u32) {
        let mut state = self.lock();
        if let Some(key) = Self::find_key(&state, mcam_id) {
            if let Some(cam) = state.cameras.get_mut(&key) {
                cam.refuse_stream = true;
            }
        }
    }

    pub fn lens_position(&self, mcam_id: u32) -> Option<u32> {
        let state = self.lock();
        let key = Self::find_key(&state, mcam_id)?;
        state.cameras.get(&key).map(|c| c.lens)
    }

    /// Accepted focus commands of `mcam_id`, homes included.
    pub fn focus_commands(&self, mcam_id: u32) -> u32 {
        let state = self.lock();
        Self::find_key(&state, mcam_id)
            .and_then(|key| state.cameras.get(&key).map(|c| c.commands))
            .unwrap_or(0)
    }

    pub fn outstanding_buffers(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn active_streams(&self) -> usize {
        self.lock().ports.len()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn frames_grabbed(&self) -> u64 {
        self.lock().frames_grabbed
    }

    pub fn streams_started(&self) -> u64 {
        self.lock().streams_started
    }

    pub fn connections_opened(&self) -> u64 {
        self.lock().connections_opened
    }
}

impl MantisApi for SimulatedMantis {
    fn connect(&self, endpoint: &HostEndpoint) -> Result<ConnectionHandle, AutofocusError> {
        let mut state = self.lock();
        match state.hosts.get(&endpoint.host) {
            Some(host) if host.reachable => {}
            Some(_) => {
                return Err(AutofocusError::connection(
                    endpoint.host.clone(),
                    "connection refused",
                ))
            }
            None => {
                return Err(AutofocusError::connection(
                    endpoint.host.clone(),
                    "no route to host",
                ))
            }
        }
        state.next_connection += 1;
        state.connections_opened += 1;
        let id = state.next_connection;
        state.connections.insert(id);
        log::debug!("Simulator: connection {} to {}", id, endpoint);
        Ok(ConnectionHandle {
            id,
            endpoint: endpoint.clone(),
        })
    }

    fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), AutofocusError> {
        if self.lock().connections.remove(&connection.id) {
            Ok(())
        } else {
            Err(AutofocusError::connection(
                connection.endpoint.host.clone(),
                format!("connection {} is not open", connection.id),
            ))
        }
    }

    fn list_microcameras(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<Vec<CameraHandle>, AutofocusError> {
        let state = self.lock();
        if !state.connections.contains(&connection.id) {
            return Err(AutofocusError::connection(
                connection.endpoint.host.clone(),
                "connection is not open",
            ));
        }
        let mut ids = state
            .hosts
            .get(&connection.endpoint.host)
            .map(|h| h.cameras.clone())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| CameraHandle::new(id, connection.endpoint.clone()))
            .collect())
    }

    fn start_stream(&self, camera: &CameraHandle, stream_port: u16) -> bool {
        let key = Self::camera_key(camera);
        let mut state = self.lock();
        if state.ports.contains_key(&stream_port) {
            log::warn!("Simulator: port {} already streaming", stream_port);
            return false;
        }
        match state.cameras.get_mut(&key) {
            Some(cam) if !cam.refuse_stream && cam.stream_port.is_none() => {
                cam.stream_port = Some(stream_port);
            }
            _ => return false,
        }
        state
            .ports
            .insert(stream_port, (key.clone(), Arc::new(LatestFrameSlot::new())));
        state.streams_started += 1;
        self.publish(&mut state, &key);
        true
    }

    fn stop_stream(&self, camera: &CameraHandle, stream_port: u16) -> bool {
        let key = Self::camera_key(camera);
        let mut state = self.lock();
        match state.ports.get(&stream_port) {
            Some((owner, _)) if *owner == key => {}
            _ => return false,
        }
        if let Some((_, slot)) = state.ports.remove(&stream_port) {
            slot.close();
        }
        if let Some(cam) = state.cameras.get_mut(&key) {
            cam.stream_port = None;
        }
        true
    }

    fn grab_frame(&self, stream_port: u16, timeout: Duration) -> Option<FrameBuffer> {
        let (key, slot) = self.lock().ports.get(&stream_port).cloned()?;

        let mut frame = slot.take(timeout).ok().flatten()?;

        let mut state = self.lock();
        state.frames_grabbed += 1;
        state.outstanding.insert(frame.buffer_id);
        if let Some(cam) = state.cameras.get_mut(&key) {
            if cam.corrupt_pending > 0 {
                cam.corrupt_pending -= 1;
                frame.data = Bytes::from_static(b"\xff\xd8corrupt frame");
            }
        }
        // Keep the stream live for the next grab.
        self.publish(&mut state, &key);
        Some(frame)
    }

    fn release_frame_buffer(&self, buffer: FrameBuffer) -> bool {
        self.lock().outstanding.remove(&buffer.buffer_id)
    }

    fn focus_step_near(&self, camera: &CameraHandle, steps: u32) -> bool {
        self.step(camera, -i64::from(steps))
    }

    fn focus_step_far(&self, camera: &CameraHandle, steps: u32) -> bool {
        self.step(camera, i64::from(steps))
    }
}
