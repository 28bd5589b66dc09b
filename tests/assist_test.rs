//! Assisted manual focus against the simulator.

use mcam_autofocus::focus::{AssistCommand, FocusAssist, McamMotor, StreamFrameSource};
use mcam_autofocus::testing::{RecordingSleeper, SimulatedMantis};
use mcam_autofocus::{CancelToken, FocusActuator, HostEndpoint, LaplacianScorer, MantisApi};
use std::time::Duration;

#[test]
fn test_operator_walks_lens_into_focus() {
    let sim = SimulatedMantis::builder().host("10.0.1.1", &[(1, 1200)]).build();
    let conn = sim.connect(&HostEndpoint::new("10.0.1.1", 9999)).unwrap();
    let camera = sim.list_microcameras(&conn).unwrap().remove(0);
    assert!(sim.start_stream(&camera, 13000));

    let sleeper = RecordingSleeper::new();
    let cancel = CancelToken::new();
    let scorer = LaplacianScorer;
    let mut actuator = FocusActuator::new(McamMotor::new(&sim, &camera), Duration::ZERO, &sleeper, &cancel);
    actuator.home().unwrap();
    let frames = StreamFrameSource::new(&sim, 13000, Duration::from_millis(50), &scorer);
    let mut assist = FocusAssist::new(actuator, frames);

    let far_off = assist.sample().unwrap();
    assert_eq!(far_off.position, 0);

    assist.apply("s 400".parse::<AssistCommand>().unwrap()).unwrap();
    for _ in 0..3 {
        assist.apply(AssistCommand::StepIn).unwrap();
    }
    assert_eq!(assist.position(), 1200);
    let in_focus = assist.sample().unwrap();
    assert!(in_focus.metric > far_off.metric);
    assert_eq!(in_focus.overlay.dimensions(), (64, 48));

    assist.apply(AssistCommand::StepOut).unwrap();
    let backed_off = assist.sample().unwrap();
    assert!(backed_off.metric < in_focus.metric);

    assert_eq!(sim.lens_position(1), Some(800));
    assert_eq!(sim.outstanding_buffers(), 0);
    assert!(sim.stop_stream(&camera, 13000));
    sim.disconnect(&conn).unwrap();
}
