use assert_matches::assert_matches;

use super::*;
use crate::device::Device;
use crate::error::SimError;
use crate::library;
use crate::special::{PinAccess, Rom, SpecialDevice};

/// Two cross-coupled NANDs with inverting input buffers: a set/reset latch
/// with active-high pulses.
fn nand_latch(name: &str) -> Device {
    let mut latch = Device::new(name, "nand_latch", &["s", "r"], &["q", "not_q"]);
    latch.add_gate("not_s", GateKind::Not, &[]);
    latch.add_gate("not_r", GateKind::Not, &[]);
    latch.add_gate("nand_a", GateKind::Nand, &["input_0", "input_1"]);
    latch.add_gate("nand_b", GateKind::Nand, &["input_0", "input_1"]);
    latch.connect("s", "not_s", "input");
    latch.connect("r", "not_r", "input");
    latch.child_connect("not_s", &["nand_a", "input_0"]);
    latch.child_connect("not_r", &["nand_b", "input_0"]);
    latch.child_connect("nand_a", &["nand_b", "input_1"]);
    latch.child_connect("nand_b", &["nand_a", "input_1"]);
    latch.child_connect("nand_a", &["parent", "q"]);
    latch.child_connect("nand_b", &["parent", "not_q"]);
    latch.stabilise();
    latch
}

fn assert_quiescent(device: &Device) {
    for pin in &device.pins {
        assert!(
            !pin.state_changed,
            "pin {} of {} still flagged",
            pin.name, device.full_name
        );
    }
    for child in &device.children {
        match child {
            Part::Gate(gate) => {
                for pin in gate.pins() {
                    assert!(!pin.state_changed, "gate pin {} still flagged", pin.name);
                }
            }
            Part::Device(inner) => assert_quiescent(inner),
        }
    }
}

#[test]
fn nand_latch_converges_and_latches() {
    // Scenario: cross-coupled NAND latch, pulsed on each side.
    let mut sim = Simulation::new("test_sim");
    sim.add_component(nand_latch("latch"));
    sim.stabilise();
    assert_eq!(sim.errors(), Vec::<String>::new());

    sim.child_set("latch", "s", true);
    sim.child_set("latch", "s", false);
    assert_eq!(sim.pin_state("test_sim:latch", "q"), Some(true));
    assert_eq!(sim.pin_state("test_sim:latch", "not_q"), Some(false));

    sim.child_set("latch", "r", true);
    sim.child_set("latch", "r", false);
    assert_eq!(sim.pin_state("test_sim:latch", "q"), Some(false));
    assert_eq!(sim.pin_state("test_sim:latch", "not_q"), Some(true));
    assert!(!sim.has_errors());
}

#[test]
fn stabilise_clears_every_change_flag() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(library::four_bit_counter("counter"));
    sim.stabilise();
    assert_eq!(sim.errors(), Vec::<String>::new());
    assert_quiescent(&sim.device);
}

#[test]
fn unconnected_gate_inputs_reported() {
    let mut sim = Simulation::new("test_sim");
    sim.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    sim.stabilise();
    let errors = sim.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("in pin input_0 is not driven"));
    assert!(errors[1].contains("in pin input_1 is not driven"));
}

#[test]
fn jk_flip_flop_toggles_on_clock() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(library::jk_ff("test_ff"));
    sim.stabilise();
    sim.add_clock("clock_0", &[false, true]);
    sim.clock_connect("clock_0", "test_ff", "clk");
    sim.add_probe(
        "ff_q",
        "test_sim:test_ff",
        &["q"],
        "clock_0",
        ProbeConfig::default(),
    );
    assert_eq!(sim.errors(), Vec::<String>::new());

    // The latch pair settles arbitrarily out of build; clock in j=0, k=1 to
    // reach a known q=0 before sampling the toggle sequence.
    sim.child_set("test_ff", "k", true);
    sim.run(RunOptions::ticks(3).with_quiet(true));
    assert_eq!(sim.pin_state("test_sim:test_ff", "q"), Some(false));

    sim.child_set("test_ff", "j", true);
    sim.run(RunOptions::ticks(8).with_quiet(true));
    let q: Vec<bool> = sim
        .probe_samples("ff_q")
        .unwrap()
        .iter()
        .map(|row| row[0])
        .collect();
    assert_eq!(
        q,
        [false, false, true, true, false, false, true, true],
        "q toggles once per full clock cycle"
    );
    assert!(!sim.has_errors());
}

#[test]
fn four_bit_counter_counts_from_zero() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(library::four_bit_counter("test_counter"));
    sim.stabilise();
    sim.add_clock("clock_0", &[false, true]);
    sim.clock_connect("clock_0", "test_counter", "clk");
    sim.add_probe(
        "counter_outputs",
        "test_sim:test_counter",
        &["q_0", "q_1", "q_2", "q_3"],
        "clock_0",
        ProbeConfig::default(),
    );
    assert_eq!(sim.errors(), Vec::<String>::new());

    sim.child_set("test_counter", "not_c", false);
    sim.child_set("test_counter", "not_c", true);
    sim.child_set("test_counter", "run", true);
    sim.run(RunOptions::ticks(34).with_quiet(true));

    let values: Vec<u64> = sim
        .probe_samples("counter_outputs")
        .unwrap()
        .iter()
        .map(|row| row.iter().enumerate().map(|(bit, &s)| (s as u64) << bit).sum())
        .collect();
    let expected: Vec<u64> = (0..34u64).map(|tick| (tick / 2) % 16).collect();
    assert_eq!(values, expected, "each value holds for one full clock cycle");
    assert!(!sim.has_errors());
}

#[test]
fn all_stop_halts_the_run() {
    let mut sim = Simulation::new("test_sim");
    let mut stopper = Device::new("stopper", "stopper", &["trip"], &[]);
    stopper.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    stopper.connect("trip", "and_0", "input_0");
    stopper.connect("trip", "and_0", "input_1");
    stopper.child_connect("and_0", &["parent", "all_stop"]);
    stopper.stabilise();
    sim.add_component(stopper);
    sim.stabilise();
    sim.add_clock("clock_0", &[false, false, false, false, false, true]);
    sim.clock_connect("clock_0", "stopper", "trip");
    sim.add_probe(
        "trip_probe",
        "test_sim:stopper",
        &["trip"],
        "clock_0",
        ProbeConfig::default(),
    );
    assert_eq!(sim.errors(), Vec::<String>::new());

    sim.run(RunOptions::ticks(100).with_quiet(true));
    assert_eq!(sim.global_tick(), 5, "run halts during the fatal tick");
    let errors = sim.error_log();
    assert_matches!(errors.as_slice(), [SimError::AllStop { path }] if path == "test_sim:stopper");
    assert_eq!(
        sim.probe_samples("trip_probe").unwrap().len(),
        5,
        "the fatal tick is not sampled"
    );
}

#[test]
fn probe_rows_follow_construction_pin_order() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(nand_latch("latch"));
    sim.stabilise();
    sim.add_clock("clock_0", &[true, false, false, false]);
    sim.clock_connect("clock_0", "latch", "s");
    sim.add_probe(
        "latch_pins",
        "test_sim:latch",
        &["not_q", "q"],
        "clock_0",
        ProbeConfig::default(),
    );
    assert_eq!(sim.errors(), Vec::<String>::new());
    sim.run(RunOptions::ticks(6).with_quiet(true));

    let samples = sim.probe_samples("latch_pins").unwrap().to_vec();
    assert_eq!(samples.len(), 6);
    for row in &samples {
        assert_eq!(row[0], !row[1], "rows are [not_q, q]");
    }
    // The final row equals the settled end-of-run pin states.
    let last = samples.last().unwrap();
    assert_eq!(sim.pin_state("test_sim:latch", "not_q"), Some(last[0]));
    assert_eq!(sim.pin_state("test_sim:latch", "q"), Some(last[1]));
    assert_eq!(
        sim.probe_timestamps("latch_pins").unwrap(),
        &[0, 1, 2, 3, 4, 5]
    );
}

fn counter_session(sim: &mut Simulation) -> Vec<Vec<bool>> {
    sim.child_set("test_counter", "not_c", false);
    sim.child_set("test_counter", "not_c", true);
    sim.child_set("test_counter", "run", true);
    sim.run(RunOptions::ticks(12).with_quiet(true));
    sim.probe_samples("counter_outputs").unwrap().to_vec()
}

#[test]
fn reset_reproduces_the_first_run() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(library::four_bit_counter("test_counter"));
    sim.stabilise();
    sim.add_clock("clock_0", &[false, true]);
    sim.clock_connect("clock_0", "test_counter", "clk");
    sim.add_probe(
        "counter_outputs",
        "test_sim:test_counter",
        &["q_0", "q_1", "q_2", "q_3"],
        "clock_0",
        ProbeConfig::default(),
    );
    assert_eq!(sim.errors(), Vec::<String>::new());

    let first = counter_session(&mut sim);
    sim.reset();
    let second = counter_session(&mut sim);
    assert_eq!(first, second);
    assert!(!sim.has_errors());
}

#[test]
fn threaded_and_sequential_solves_agree() {
    let run_once = |threaded: bool| -> Vec<Vec<bool>> {
        let mut sim = Simulation::new("test_sim");
        if threaded {
            sim = sim.with_solver_config(SolverConfig {
                use_threads: true,
                threaded_solve_nesting_level: 1,
            });
        }
        sim.add_component(library::four_bit_counter("test_counter"));
        sim.stabilise();
        sim.add_clock("clock_0", &[false, true]);
        sim.clock_connect("clock_0", "test_counter", "clk");
        sim.add_probe(
            "counter_outputs",
            "test_sim:test_counter",
            &["q_0", "q_1", "q_2", "q_3"],
            "clock_0",
            ProbeConfig::default(),
        );
        assert_eq!(sim.errors(), Vec::<String>::new());
        counter_session(&mut sim)
    };
    assert_eq!(run_once(false), run_once(true));
}

#[test]
fn clock_and_probe_registration_errors() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(nand_latch("latch"));
    sim.stabilise();
    sim.add_clock("clock_0", &[false, true]);

    sim.add_clock("clock_0", &[true]);
    sim.add_clock("empty", &[]);
    sim.clock_connect("missing", "latch", "s");
    sim.clock_connect("clock_0", "nope", "s");
    sim.clock_connect("clock_0", "latch", "nope");
    sim.clock_connect("clock_0", "latch", "all_stop");
    sim.clock_connect("clock_0", "latch", "s");
    sim.clock_connect("clock_0", "latch", "s");
    sim.add_probe("p_0", "test_sim:nope", &["q"], "clock_0", ProbeConfig::default());
    sim.add_probe(
        "p_1",
        "test_sim:latch",
        &["nope", "q"],
        "clock_0",
        ProbeConfig::default(),
    );
    sim.add_probe("p_2", "test_sim:latch", &["q"], "missing", ProbeConfig::default());

    let errors = sim.error_log();
    assert_matches!(
        errors.as_slice(),
        [
            SimError::ClockDuplicate { .. },
            SimError::ClockEmptyPattern { .. },
            SimError::ClockMissing { .. },
            SimError::ClockTargetMissing { .. },
            SimError::ClockPinMissing { .. },
            SimError::ClockPinKind { .. },
            SimError::ClockPinDriven { .. },
            SimError::ProbeTargetMissing { .. },
            SimError::ProbePinsMissing { .. },
            SimError::ProbeClockMissing { .. },
        ]
    );
}

/// Raises `data_ready` from the asynchronous side exactly once.
#[derive(Debug)]
struct Injector {
    armed: bool,
    data_ready: usize,
}

impl SpecialDevice for Injector {
    fn update(&mut self, pins: &mut PinAccess<'_>) {
        if self.armed {
            self.armed = false;
            pins.set(self.data_ready, true);
        }
    }

    fn solve(&mut self, _pins: &mut PinAccess<'_>) {}
}

#[test]
fn special_update_runs_ahead_of_the_tick() {
    let mut shell = Device::new("inject", "injector", &[], &["data_ready"]);
    shell.mark_inner_terminals_connected();
    let data_ready = shell.pin_index("data_ready").unwrap();
    shell.set_special(Box::new(Injector {
        armed: true,
        data_ready,
    }));
    shell.stabilise();

    let mut sim = Simulation::new("test_sim");
    sim.add_component(shell);
    sim.stabilise();
    assert_eq!(sim.errors(), Vec::<String>::new());
    assert_eq!(sim.pin_state("test_sim:inject", "data_ready"), Some(false));

    sim.run(RunOptions::ticks(1).with_quiet(true));
    assert_eq!(sim.pin_state("test_sim:inject", "data_ready"), Some(true));
    assert!(!sim.has_errors());
}

#[test]
fn rom_drives_addressed_word_on_falling_clock() {
    let data_file = std::env::temp_dir().join(format!("logic_sim_rom_{}.txt", std::process::id()));
    std::fs::write(&data_file, "0x3\n2\n0b101\n").unwrap();

    let mut sim = Simulation::new("test_sim");
    sim.add_component(Rom::device("rom", &data_file, 2, 3));
    sim.stabilise();
    assert_eq!(sim.errors(), Vec::<String>::new());

    sim.child_set("rom", "read", true);
    sim.child_set("rom", "a_1", true);
    sim.child_set("rom", "clk", true);
    sim.child_set("rom", "clk", false);
    // Word 2 is 0b101.
    assert_eq!(sim.pin_state("test_sim:rom", "d_0"), Some(true));
    assert_eq!(sim.pin_state("test_sim:rom", "d_1"), Some(false));
    assert_eq!(sim.pin_state("test_sim:rom", "d_2"), Some(true));

    sim.child_set("rom", "read", false);
    assert_eq!(sim.pin_state("test_sim:rom", "d_0"), Some(false));
    assert_eq!(sim.pin_state("test_sim:rom", "d_2"), Some(false));

    std::fs::remove_file(&data_file).ok();
}

#[test]
fn missing_rom_file_is_a_build_error() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(Rom::device("rom", "/nonexistent/rom.txt", 2, 3));
    sim.stabilise();
    assert_matches!(sim.error_log().as_slice(), [SimError::RomFile { .. }]);
}

#[test]
fn remove_component_remaps_clocks_and_probes() {
    let mut sim = Simulation::new("test_sim");
    sim.add_component(nand_latch("latch_a"));
    sim.add_component(nand_latch("latch_b"));
    sim.stabilise();
    sim.add_clock("clock_0", &[true, false]);
    sim.clock_connect("clock_0", "latch_a", "s");
    sim.clock_connect("clock_0", "latch_b", "s");
    sim.add_probe("probe_a", "test_sim:latch_a", &["q"], "clock_0", ProbeConfig::default());
    sim.add_probe("probe_b", "test_sim:latch_b", &["q"], "clock_0", ProbeConfig::default());
    assert_eq!(sim.errors(), Vec::<String>::new());

    assert!(sim.remove_component("test_sim:latch_a"));
    assert_eq!(sim.find_component("test_sim:latch_b"), Some(vec![0]));
    assert_eq!(sim.probe_samples("probe_a"), None);

    // The surviving latch still runs and its probe still samples it.
    sim.run(RunOptions::ticks(4).with_quiet(true));
    assert_eq!(sim.probe_samples("probe_b").unwrap().len(), 4);
    assert_eq!(sim.pin_state("test_sim:latch_b", "q"), Some(true));
    assert!(!sim.has_errors());
}
