/// Focus Control Module
///
/// Closed-loop focusing of a single microcamera:
/// 1. Home the focus motor to a known extreme
/// 2. Coarse sweep across the whole range, scoring a frame at each step
/// 3. Return near the best coarse position
/// 4. Fine sweep in small steps until the metric peaks
///
/// All motor traffic goes through [`actuator::FocusActuator`], which tracks
/// the absolute position the device cannot report. Frames come from a
/// [`frame_source::FrameSource`], which releases every transport buffer it
/// touches.
pub mod actuator;
pub mod assist;
pub mod frame_slot;
pub mod frame_source;
pub mod search;

pub use actuator::{FocusActuator, FocusMotor, McamMotor};
pub use assist::{AssistCommand, AssistSample, FocusAssist};
pub use frame_slot::{LatestFrameSlot, SlotClosed};
pub use frame_source::{FrameGuard, FrameSource, StreamFrameSource};
pub use search::FocusSearch;
