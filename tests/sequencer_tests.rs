mod common;

use common::{MockStorage, MockOutput, OutputCall, TestSequencer, external, seg, sequencer_with};
use rgbw_sequencer::colors::{BLUE, GREEN, OFF, RED, WHITE};
use rgbw_sequencer::sequencer::NEW_SEQUENCE;
use rgbw_sequencer::{
    ButtonEvent, ControlError, MacroError, PLAY_MACROS, Parameter, ReportValue, Segment,
    Sequencer, SequencerState, ServiceTiming, StoreError,
};

fn three_sequences() -> (TestSequencer, [Segment; 3]) {
    let a = seg(1, 10, 100, 0, 0, 0);
    let b = seg(2, 20, 0, 100, 0, 0);
    let c = seg(3, 30, 0, 0, 100, 0);
    (sequencer_with(&[&[a], &[b], &[c]]), [a, b, c])
}

/// Services `times` times at night and returns the ramps issued.
fn run(sequencer: &mut TestSequencer, times: usize) -> Vec<Segment> {
    let before = sequencer.output().ramps().len();
    for _ in 0..times {
        sequencer.service(true);
    }
    sequencer.output().ramps()[before..].to_vec()
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn startup_turns_the_output_off() {
    let sequencer = Sequencer::new(external(), MockStorage::internal(), MockOutput::new());
    assert_eq!(sequencer.output().calls.first(), Some(&OutputCall::Set(OFF)));
    assert_eq!(sequencer.state(), SequencerState::Playing);
}

#[test]
fn playback_range_is_clamped_to_stored_sequences() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(sequencer.range(), (0, 2));

    sequencer.configure(Parameter::StartSequence.address(), 1).unwrap();
    sequencer.configure(Parameter::TotalSequences.address(), 2).unwrap();
    sequencer.init_mode();
    assert_eq!(sequencer.range(), (1, 2));

    sequencer.configure(Parameter::TotalSequences.address(), 50).unwrap();
    sequencer.init_mode();
    assert_eq!(sequencer.range(), (1, 2));
}

#[test]
fn missing_start_sequence_falls_back_to_zero() {
    let (mut sequencer, _) = three_sequences();
    sequencer.configure(Parameter::StartSequence.address(), 9).unwrap();
    sequencer.init_mode();
    assert_eq!(sequencer.active(), 0);
    assert_eq!(sequencer.range(), (0, 2));
}

#[test]
fn show_version_flashes_then_tests_each_channel() {
    let mut sequencer = sequencer_with(&[]);
    sequencer.show_version(2);

    let ramps = run(&mut sequencer, 9);
    assert_eq!(
        ramps,
        vec![
            Segment::new(0, 5, BLUE),
            Segment::new(0, 20, OFF),
            Segment::new(0, 5, BLUE),
            Segment::new(0, 20, OFF),
            Segment::new(0, 5, RED),
            Segment::new(0, 5, WHITE),
            Segment::new(0, 5, GREEN),
            Segment::new(0, 5, BLUE),
            Segment::new(0, 5, OFF),
        ]
    );
}

// ============================================================================
// Playback
// ============================================================================

#[test]
fn plays_every_segment_then_wraps() {
    let a = seg(1, 1, 10, 0, 0, 0);
    let b = seg(2, 2, 20, 0, 0, 0);
    let c = seg(3, 3, 30, 0, 0, 0);
    let mut sequencer = sequencer_with(&[&[a, b], &[c]]);

    assert_eq!(sequencer.service(true), ServiceTiming::Started);
    assert_eq!(sequencer.service(true), ServiceTiming::Started);
    assert_eq!(sequencer.service(true), ServiceTiming::Idle);
    assert_eq!(sequencer.active(), 1);

    let ramps = run(&mut sequencer, 3);
    assert_eq!(ramps, vec![c, a]);
    assert_eq!(sequencer.output().ramps(), vec![a, b, c, a]);
}

#[test]
fn busy_output_is_left_alone() {
    let (mut sequencer, [a, ..]) = three_sequences();
    sequencer.output_mut().busy = true;
    assert_eq!(sequencer.service(true), ServiceTiming::Busy);
    assert!(sequencer.output().ramps().is_empty());

    sequencer.output_mut().busy = false;
    assert_eq!(run(&mut sequencer, 1), vec![a]);
}

#[test]
fn daylight_fades_out_once() {
    let (mut sequencer, [a, ..]) = three_sequences();

    assert_eq!(sequencer.service(false), ServiceTiming::Started);
    assert_eq!(sequencer.service(false), ServiceTiming::Idle);
    assert_eq!(sequencer.output().ramps(), vec![Segment::new(1, 0, OFF)]);

    assert_eq!(run(&mut sequencer, 1), vec![a]);
}

#[test]
fn lights_stay_on_when_night_sensing_is_disabled() {
    let (mut sequencer, [a, b, _]) = three_sequences();
    sequencer.configure(Parameter::Enabled.address(), 0).unwrap();

    sequencer.service(false);
    sequencer.service(false);
    sequencer.service(false);
    assert_eq!(sequencer.output().ramps(), vec![a, b]);
}

#[test]
fn missing_sequence_flashes_an_error() {
    let mut sequencer = sequencer_with(&[]);
    assert_eq!(sequencer.service(true), ServiceTiming::Idle);

    let ramps = run(&mut sequencer, 2);
    assert_eq!(ramps, vec![Segment::new(0, 40, RED), Segment::new(0, 5, OFF)]);
}

#[test]
fn override_holds_the_outputs() {
    let (mut sequencer, _) = three_sequences();
    let levels = rgbw_sequencer::Levels::new(9, 8, 7, 6);
    sequencer.override_output(levels);

    assert_eq!(sequencer.service(true), ServiceTiming::Idle);
    assert_eq!(sequencer.output().last_set(), Some(levels));
    assert!(sequencer.output().ramps().is_empty());
}

#[test]
fn run_range_restarts_playback() {
    let (mut sequencer, [_, b, c]) = three_sequences();
    assert_eq!(sequencer.run_range(1, 2), Ok(2));
    assert_eq!(run(&mut sequencer, 4), vec![b, c]);
    assert_eq!(sequencer.active(), 1);
}

#[test]
fn run_range_rejects_missing_sequences() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(sequencer.run_range(2, 2), Err(ControlError::SequenceNotFound(3)));
    assert_eq!(sequencer.run_range(0, 0), Err(ControlError::SequenceNotFound(0)));
    assert_eq!(sequencer.config().total_sequences, 61);
}

// ============================================================================
// Macros
// ============================================================================

#[test]
fn macros_map_playback_onto_sequences() {
    let (mut sequencer, [a, _, c]) = three_sequences();
    assert_eq!(sequencer.write_macros(0, &[0, 2, 0, 0]), Ok(4));
    assert!(sequencer.is_playing_macros());
    assert_eq!(sequencer.range(), (0, 1));

    assert_eq!(run(&mut sequencer, 5), vec![c, a, c]);
}

#[test]
fn write_macros_checks_its_input() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(sequencer.write_macros(0, &[0, 1, 0]), Err(ControlError::MalformedPayload));
    assert_eq!(sequencer.write_macros(3, &[0, 1]), Err(ControlError::MalformedPayload));
    assert_eq!(
        sequencer.write_macros(0, &[0xFF, 0xFF]),
        Err(ControlError::Macro(MacroError::ReservedValue))
    );

    assert_eq!(sequencer.write_macros(0, &[0; 198]), Ok(198));
    assert_eq!(
        sequencer.write_macros(0xFFFF, &[0, 1, 0, 2]),
        Err(ControlError::Macro(MacroError::CapacityExceeded))
    );
    assert_eq!(sequencer.macro_count(), 99);
}

#[test]
fn empty_replace_keeps_the_macro_table() {
    let (mut sequencer, [a, _, c]) = three_sequences();
    sequencer.write_macros(0, &[0, 2, 0, 0]).unwrap();

    assert_eq!(sequencer.write_macros(0, &[]), Err(ControlError::MalformedPayload));
    assert_eq!(sequencer.macro_count(), 2);
    assert_eq!(run(&mut sequencer, 3), vec![c, a]);
}

#[test]
fn macro_mode_without_macros_plays_sequences() {
    let (mut sequencer, [a, b, _]) = three_sequences();
    sequencer.configure(Parameter::StartSequence.address(), PLAY_MACROS).unwrap();
    sequencer.init_mode();

    assert!(!sequencer.is_playing_macros());
    assert_eq!(sequencer.range(), (0, 2));
    assert_eq!(run(&mut sequencer, 3), vec![a, b]);
    assert!(!sequencer.output().ramps().iter().any(|step| step.levels == RED));
}

#[test]
fn buttons_record_macros() {
    let (mut sequencer, _) = three_sequences();

    sequencer.handle_button(ButtonEvent::SelectPressed);
    assert_eq!(sequencer.state(), SequencerState::Defining { candidate: 0 });

    for expected in [1, 2, 0] {
        sequencer.handle_button(ButtonEvent::NextPressed);
        assert_eq!(sequencer.state(), SequencerState::Defining { candidate: expected });
    }

    sequencer.handle_button(ButtonEvent::SelectPressed);
    sequencer.handle_button(ButtonEvent::NextPressed);
    sequencer.handle_button(ButtonEvent::NextPressed);
    sequencer.handle_button(ButtonEvent::SelectPressed);
    sequencer.handle_button(ButtonEvent::SelectHeld);

    assert_eq!(sequencer.state(), SequencerState::Playing);
    assert_eq!(sequencer.macro_count(), 2);
    assert_eq!(sequencer.read_macro(0), 0);
    assert_eq!(sequencer.read_macro(1), 2);
    assert_eq!(sequencer.config().start_sequence, PLAY_MACROS);
    assert!(sequencer.is_playing_macros());
    assert_eq!(sequencer.range(), (0, 1));
}

#[test]
fn finishing_without_macros_restores_the_start() {
    let (mut sequencer, _) = three_sequences();
    sequencer.configure(Parameter::StartSequence.address(), 2).unwrap();

    sequencer.handle_button(ButtonEvent::SelectPressed);
    sequencer.handle_button(ButtonEvent::SelectHeld);

    assert_eq!(sequencer.config().start_sequence, 2);
    assert!(!sequencer.is_playing_macros());
    assert_eq!(sequencer.active(), 2);
}

#[test]
fn defining_loops_the_candidate_day_or_night() {
    let a = seg(4, 4, 1, 2, 3, 4);
    let mut sequencer = sequencer_with(&[&[a]]);
    sequencer.handle_button(ButtonEvent::SelectPressed);

    for _ in 0..5 {
        sequencer.service(false);
    }
    assert_eq!(
        sequencer.output().ramps(),
        vec![Segment::new(0, 10, BLUE), Segment::new(0, 5, OFF), a, a]
    );
}

#[test]
fn button_aborts_the_current_segment() {
    let (mut sequencer, _) = three_sequences();
    run(&mut sequencer, 1);
    sequencer.handle_button(ButtonEvent::NextPressed);

    assert_eq!(sequencer.output().calls.last(), Some(&OutputCall::Set(OFF)));
    assert_eq!(sequencer.active(), 1);
}

#[test]
fn full_macro_table_flashes_an_error() {
    let (mut sequencer, _) = three_sequences();
    sequencer.write_macros(0, &[0; 200]).unwrap();

    sequencer.handle_button(ButtonEvent::SelectPressed);
    sequencer.handle_button(ButtonEvent::SelectPressed);
    assert_eq!(sequencer.macro_count(), 100);

    let ramps = run(&mut sequencer, 4);
    assert_eq!(
        ramps,
        vec![
            Segment::new(0, 10, BLUE),
            Segment::new(0, 5, OFF),
            Segment::new(0, 40, RED),
            Segment::new(0, 5, OFF),
        ]
    );
}

// ============================================================================
// Remote operations
// ============================================================================

#[test]
fn write_segments_appends_tuples() {
    let mut sequencer = sequencer_with(&[]);
    let payload = [5, 5, 255, 0, 0, 0, 3, 10, 0, 255, 0, 0];
    assert_eq!(sequencer.write_segments(NEW_SEQUENCE, &payload), Ok(12));
    assert_eq!(sequencer.write_segments(NEW_SEQUENCE, &payload[..6]), Ok(6));

    assert_eq!(sequencer.sequences().count(), 2);
    assert_eq!(sequencer.sequences().segment(0, 1), Some(seg(3, 10, 0, 255, 0, 0)));
    assert_eq!(sequencer.write_segments(0, &[]), Err(ControlError::MalformedPayload));
}

#[test]
fn erase_range_reports_store_errors() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(
        sequencer.erase_range(5, 6),
        Err(ControlError::Store(StoreError::NotFound))
    );
    assert_eq!(sequencer.erase_range(0, 1), Ok(1));
    assert_eq!(sequencer.sequences().count(), 1);
}

#[test]
fn report_uses_parameter_widths() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(sequencer.report(Parameter::Enabled), ReportValue::Byte(1));
    assert_eq!(sequencer.report(Parameter::Duration), ReportValue::Word(360));
    assert_eq!(sequencer.report(Parameter::DeviceAddress), ReportValue::Byte(0xFF));
    assert_eq!(sequencer.report(Parameter::DefinedSequences), ReportValue::Word(3));
}

#[test]
fn configure_persists_to_the_internal_area() {
    let (mut sequencer, _) = three_sequences();
    assert_eq!(sequencer.configure(Parameter::OnDelay.address(), 9), Ok(9));
    assert_eq!(sequencer.nv().data[2], 9);
    assert!(sequencer.configure(4, 1).is_err());
}
