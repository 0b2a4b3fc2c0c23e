//! Selector-side behaviour checked against the host decoder
//!
//! Whatever the firmware writes to its serial line must decode on the host
//! into exactly the commits the user made.

use std::convert::Infallible;
use storydial::device::{
    parse_script, run_script, selection_index, EncoderCounter, InputConfig, InputStateMachine, QuadratureDecoder,
    SelectorDisplay, SelectorFirmware,
};
use storydial::protocol::{CharacterRoster, SelectionDecoder, DEFAULT_MAX_LINE_LEN};

#[derive(Default)]
struct Screen {
    frames: Vec<usize>,
}

impl SelectorDisplay for Screen {
    type Error = Infallible;

    fn show(&mut self, index: usize) -> Result<(), Self::Error> {
        self.frames.push(index);
        Ok(())
    }
}

fn roster() -> CharacterRoster {
    CharacterRoster::new(["Rubble", "Skye", "Marshall"])
}

fn decode(lines: &[String]) -> Vec<(usize, String)> {
    let mut decoder = SelectionDecoder::new("sim", roster(), DEFAULT_MAX_LINE_LEN);
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    decoder
        .push(&bytes)
        .into_iter()
        .map(|event| (event.index, event.character_name))
        .collect()
}

#[test]
fn test_script_commits_decode_on_host() {
    let steps = parse_script(
        "0    rotate 1\n\
         400  press\n\
         480  release\n\
         900  rotate -4\n\
         1400 press\n\
         1460 release\n",
    )
    .unwrap();
    let report = run_script(&steps, roster(), InputConfig::default());

    assert_eq!(report.commits, vec![1, 0]);
    assert_eq!(report.final_raw_position, -3);
    assert_eq!(report.lines[0], "storydial ready characters=3");
    assert_eq!(
        decode(&report.lines),
        vec![(1, "Skye".to_string()), (0, "Rubble".to_string())]
    );
}

#[test]
fn test_negative_positions_follow_absolute_value() {
    let mut machine = InputStateMachine::new(InputConfig::default().with_character_count(3));
    let mut screen = Screen::default();

    machine.step(0, true, 0, &mut screen);
    assert_eq!(machine.displayed_index(), Some(0));
    machine.step(-1, true, 300, &mut screen);
    assert_eq!(machine.displayed_index(), Some(1));
    machine.step(-4, true, 600, &mut screen);
    assert_eq!(machine.displayed_index(), Some(1));

    // -4 lands on the index already shown, so nothing is redrawn
    assert_eq!(screen.frames, vec![0, 1]);
}

#[test]
fn test_selection_index_always_in_range() {
    for count in 1..=7usize {
        for raw in [i64::from(i32::MIN), i64::from(i32::MIN) + 1, -13, -1, 0, 1, 13, i64::from(i32::MAX)] {
            let index = selection_index(raw, count).unwrap();
            assert!(index < count, "raw {} count {} gave {}", raw, count, index);
        }
    }
    assert_eq!(selection_index(5, 0), None);
}

#[test]
fn test_rotation_burst_draws_final_position_once() {
    let counter = EncoderCounter::new();
    let mut firmware = SelectorFirmware::new(&counter, roster(), InputConfig::default(), Screen::default(), Vec::new());
    firmware.boot();
    firmware.run_once(true, 0);

    // Five steps forward within one display interval
    let mut decoder = QuadratureDecoder::new(false, false);
    let gray = [(true, false), (true, true), (false, true), (false, false)];
    for (tick, (a, b)) in gray.iter().cycle().take(5).enumerate() {
        decoder.apply(*a, *b, &counter);
        firmware.run_once(true, 10 + tick as u64 * 10);
    }
    assert_eq!(counter.load(), 5);
    assert_eq!(firmware.display().frames, vec![0]);

    firmware.run_once(true, 260);
    assert_eq!(firmware.display().frames, vec![0, 2]);
}

#[test]
fn test_button_chatter_commits_once() {
    let counter = EncoderCounter::new();
    let mut firmware = SelectorFirmware::new(&counter, roster(), InputConfig::default(), Screen::default(), Vec::new());
    firmware.run_once(true, 0);

    let mut commits = 0;
    let bounces = [false, true, false, true, false, false, false, false, false, false];
    for (i, level) in bounces.iter().enumerate() {
        if firmware.run_once(*level, 100 + i as u64 * 5).committed.is_some() {
            commits += 1;
        }
    }
    for now in (150..400).step_by(10) {
        if firmware.run_once(false, now).committed.is_some() {
            commits += 1;
        }
    }
    assert_eq!(commits, 1);

    let (_, serial) = firmware.into_parts();
    let lines: Vec<String> = String::from_utf8(serial).unwrap().lines().map(str::to_string).collect();
    assert_eq!(decode(&lines), vec![(0, "Rubble".to_string())]);
}
