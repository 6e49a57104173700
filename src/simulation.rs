//! The top-level simulation.
//!
//! `Simulation` is the root of the device tree plus everything global: the
//! clock and probe registries, the shared message/error log, the global tick
//! counter and the run loop. Build calls delegate to the root device and
//! immediately drain its accumulated errors into the log, so a broken
//! circuit reports every problem in one pass and `run` refuses to start
//! while any are present.

use std::sync::OnceLock;

use console::style;
use itertools::Itertools;

use crate::clock::{Clock, ClockConnection};
use crate::device::{Device, Part, SolverConfig};
use crate::error::{SimError, SimLog};
use crate::gate::GateKind;
use crate::pin::PinKind;
use crate::probe::{Probe, ProbeConfig};

/// How many ticks pass between stop-key polls.
const INPUT_CHECK_INTERVAL: u32 = 1000;

/// Options for [`Simulation::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Number of ticks to simulate; 0 runs until stopped.
    pub ticks: u64,
    /// Zero the tick counter and reset clocks (and their probes) first.
    pub restart: bool,
    /// Print every probe's sample table once the run ends.
    pub print_probes: bool,
    /// Suppress banners and per-tick messages.
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ticks: 0,
            restart: true,
            print_probes: false,
            quiet: false,
        }
    }
}

impl RunOptions {
    pub fn ticks(ticks: u64) -> Self {
        Self {
            ticks,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    #[must_use]
    pub fn with_print_probes(mut self, print_probes: bool) -> Self {
        self.print_probes = print_probes;
        self
    }

    #[must_use]
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

/// Ctrl-C is the stop key. The handler is process-global, so it is
/// installed once and shared by every simulation; the channel holds at most
/// one pending stop.
fn stop_channel() -> Option<&'static flume::Receiver<()>> {
    static STOP: OnceLock<Option<flume::Receiver<()>>> = OnceLock::new();
    STOP.get_or_init(|| {
        let (tx, rx) = flume::bounded(1);
        match ctrlc::set_handler(move || {
            let _ = tx.try_send(());
        }) {
            Ok(()) => Some(rx),
            Err(error) => {
                tracing::debug!(?error, "stop key unavailable");
                None
            }
        }
    })
    .as_ref()
}

fn banner(text: &str) -> String {
    format!("---- {} ----", style(text).bold())
}

pub struct Simulation {
    device: Device,
    clocks: Vec<Clock>,
    probes: Vec<Probe>,
    /// Paths to every special device, refreshed by `stabilise`.
    special_paths: Vec<Vec<usize>>,
    log: SimLog,
    solver: SolverConfig,
    global_tick: u64,
    running: bool,
}

impl Simulation {
    pub fn new(name: &str) -> Self {
        let log = SimLog::default();
        log.message(banner("Simulation build started."));
        Self {
            device: Device::new(name, "simulation", &[], &[]),
            clocks: Vec::new(),
            probes: Vec::new(),
            special_paths: Vec::new(),
            log,
            solver: SolverConfig::default(),
            global_tick: 0,
            running: false,
        }
    }

    #[must_use]
    pub fn with_solver_config(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self.device.set_threaded_children(
            solver.use_threads && solver.threaded_solve_nesting_level == 0,
        );
        self
    }

    #[must_use]
    pub fn with_max_propagations(mut self, max_propagations: usize) -> Self {
        self.device.set_max_propagations(max_propagations);
        self
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn global_tick(&self) -> u64 {
        self.global_tick
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_errors(&self) -> bool {
        self.log.has_errors()
    }

    pub fn errors(&self) -> Vec<String> {
        self.log.error_strings()
    }

    pub fn error_log(&self) -> Vec<SimError> {
        self.log.errors()
    }

    fn drain_pending(&mut self) {
        let pending = std::mem::take(&mut self.device.pending_errors);
        self.log.extend_errors(pending);
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    pub fn add_component(&mut self, child: Device) {
        let solver = self.solver;
        self.device.attach(child, &solver);
        self.drain_pending();
    }

    pub fn add_gate(&mut self, gate_name: &str, kind: GateKind, in_pins: &[&str]) {
        self.device.add_gate(gate_name, kind, in_pins);
        self.drain_pending();
    }

    pub fn connect(&mut self, origin_pin: &str, target_child: &str, target_pin: &str) {
        self.device.connect(origin_pin, target_child, target_pin);
        self.drain_pending();
    }

    pub fn child_connect(&mut self, child_name: &str, params: &[&str]) {
        self.device.child_connect(child_name, params);
        self.drain_pending();
    }

    pub fn child_mark_output_unused(&mut self, child_name: &str, out_pin_name: &str) {
        self.device.child_mark_output_unused(child_name, out_pin_name);
        self.drain_pending();
    }

    /// Drives a pin of a top-level component by hand. When the simulation
    /// is idle this immediately solves the whole tree, so the poked value
    /// settles without waiting for a `run`.
    pub fn child_set(&mut self, child_name: &str, pin_name: &str, state: bool) {
        {
            let Self { device, log, .. } = self;
            device.child_set_with(child_name, pin_name, state, log);
        }
        self.drain_pending();
        if !self.running {
            let _ = self.device.solve(&self.log);
            self.check_probe_triggers();
            self.print_messages();
        }
    }

    /// Finishes the build: settles the whole tree, reports unconnected
    /// pins, prints the build banner plus anything the build logged.
    pub fn stabilise(&mut self) {
        self.drain_pending();
        self.device.stabilise_with(&self.log);
        self.device.report_unconnected_pins(&self.log);
        self.register_special_paths();
        self.log.message(banner("Simulation build completed."));
        self.print_messages();
        self.print_errors();
    }

    fn register_special_paths(&mut self) {
        let mut base = Vec::new();
        let mut paths = Vec::new();
        self.device.collect_special_paths(&mut base, &mut paths);
        self.special_paths = paths;
    }

    // ------------------------------------------------------------------
    // Clocks and probes
    // ------------------------------------------------------------------

    pub fn add_clock(&mut self, clock_name: &str, toggle_pattern: &[bool]) {
        if self.clocks.iter().any(|c| c.name() == clock_name) {
            self.log.error(SimError::ClockDuplicate {
                name: clock_name.to_owned(),
            });
            return;
        }
        if toggle_pattern.is_empty() {
            self.log.error(SimError::ClockEmptyPattern {
                name: clock_name.to_owned(),
            });
            return;
        }
        self.clocks
            .push(Clock::new(clock_name, toggle_pattern.to_vec()));
    }

    /// Wires a clock onto an input pin of a top-level component. The target
    /// pin must be an undriven input.
    pub fn clock_connect(&mut self, clock_name: &str, component_name: &str, pin_name: &str) {
        let Some(clock_index) = self.clocks.iter().position(|c| c.name() == clock_name) else {
            self.log.error(SimError::ClockMissing {
                name: clock_name.to_owned(),
            });
            return;
        };
        let Some(child) = self.device.child_index(component_name) else {
            self.log.error(SimError::ClockTargetMissing {
                name: clock_name.to_owned(),
                target: component_name.to_owned(),
            });
            return;
        };
        let Some(pin) = self.device.children[child].pin_index(pin_name) else {
            self.log.error(SimError::ClockPinMissing {
                name: clock_name.to_owned(),
                target: component_name.to_owned(),
                pin: pin_name.to_owned(),
            });
            return;
        };
        let target_pin = &self.device.children[child].pins()[pin];
        if target_pin.drive.input {
            self.log.error(SimError::ClockPinDriven {
                name: clock_name.to_owned(),
                target: component_name.to_owned(),
                pin: pin_name.to_owned(),
            });
            return;
        }
        if target_pin.kind != PinKind::Input {
            self.log.error(SimError::ClockPinKind {
                name: clock_name.to_owned(),
                target: component_name.to_owned(),
                pin: pin_name.to_owned(),
            });
            return;
        }
        match &mut self.device.children[child] {
            Part::Gate(gate) => gate.pins_mut()[pin].drive.input = true,
            Part::Device(device) => device.pins[pin].drive.input = true,
        }
        self.clocks[clock_index]
            .connections
            .push(ClockConnection { child, pin });
    }

    /// Attaches a sampler to a component named by its colon-joined full
    /// name, triggered by a named clock.
    pub fn add_probe(
        &mut self,
        probe_name: &str,
        target_full_name: &str,
        pin_names: &[&str],
        trigger_clock_name: &str,
        config: ProbeConfig,
    ) {
        let Some(path) = self.device.find_path(target_full_name) else {
            self.log.error(SimError::ProbeTargetMissing {
                name: probe_name.to_owned(),
                target: target_full_name.to_owned(),
            });
            return;
        };
        let part = self
            .device
            .part_at(&path)
            .expect("find_path returned a live path");
        let mut pin_indices = Vec::with_capacity(pin_names.len());
        let mut missing = Vec::new();
        for pin_name in pin_names {
            match part.pin_index(pin_name) {
                Some(index) => pin_indices.push(index),
                None => missing.push(*pin_name),
            }
        }
        if !missing.is_empty() {
            self.log.error(SimError::ProbePinsMissing {
                name: probe_name.to_owned(),
                pins: missing.iter().join(", "),
            });
            return;
        }
        let Some(clock_index) = self
            .clocks
            .iter()
            .position(|c| c.name() == trigger_clock_name)
        else {
            self.log.error(SimError::ProbeClockMissing {
                name: probe_name.to_owned(),
                clock: trigger_clock_name.to_owned(),
            });
            return;
        };
        let probe_index = self.probes.len();
        self.probes.push(Probe::new(
            probe_name,
            path,
            target_full_name.to_owned(),
            pin_indices,
            config,
        ));
        self.clocks[clock_index].probes.push(probe_index);
    }

    pub fn probe_samples(&self, probe_name: &str) -> Option<&[Vec<bool>]> {
        self.probes
            .iter()
            .find(|p| p.name() == probe_name)
            .map(|p| p.samples())
    }

    pub fn probe_timestamps(&self, probe_name: &str) -> Option<&[u64]> {
        self.probes
            .iter()
            .find(|p| p.name() == probe_name)
            .map(|p| p.timestamps())
    }

    /// Current state of one pin anywhere in the tree, by full component
    /// name.
    pub fn pin_state(&self, full_component_name: &str, pin_name: &str) -> Option<bool> {
        let path = self.device.find_path(full_component_name)?;
        let part = self.device.part_at(&path)?;
        let pin = part.pin_index(pin_name)?;
        Some(part.pins()[pin].state)
    }

    pub fn find_component(&self, full_component_name: &str) -> Option<Vec<usize>> {
        self.device.find_path(full_component_name)
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// The main loop: special-device updates, clock ticks, the top-level
    /// solve, message drain, error check, probe triggers, stop key, tick
    /// increment. Refuses to start while the error log is non-empty.
    pub fn run(&mut self, opts: RunOptions) {
        if self.log.has_errors() {
            self.print_errors();
            return;
        }
        self.running = true;
        if opts.restart {
            if !opts.quiet {
                println!("\n{}", banner(&format!("Simulation started ({}).", opts.ticks)));
            }
            self.global_tick = 0;
            let Self { clocks, probes, .. } = self;
            for clock in clocks.iter_mut() {
                for &probe_index in &clock.probes {
                    probes[probe_index].reset();
                }
                clock.reset();
            }
        } else if !opts.quiet {
            println!(
                "\n{}",
                banner(&format!(
                    "Simulation restarted @ tick {} ({}).",
                    self.global_tick, opts.ticks
                ))
            );
        }
        for probe in &mut self.probes {
            probe.preallocate(opts.ticks as usize);
        }
        let stop = stop_channel();
        if let Some(rx) = stop {
            // Discard stops from before this run.
            while rx.try_recv().is_ok() {}
        }
        let mut completed_ticks = 0u64;
        let mut input_check = 0u32;
        let mut failed = false;
        loop {
            self.update_specials();
            self.tick_clocks();
            let _ = self.device.solve(&self.log);
            if opts.quiet {
                let _ = self.log.take_messages();
            } else {
                self.print_messages();
            }
            // A tick that logged an error (all_stop, failed convergence)
            // ends the run before its probes sample.
            if self.log.has_errors() {
                failed = true;
                break;
            }
            self.check_probe_triggers();
            if input_check >= INPUT_CHECK_INTERVAL {
                input_check = 0;
                if let Some(rx) = stop {
                    if rx.try_recv().is_ok() {
                        if !opts.quiet {
                            println!("\n{}", banner("STOP KEY PRESSED"));
                        }
                        break;
                    }
                }
            } else {
                input_check += 1;
            }
            self.global_tick += 1;
            if opts.ticks > 0 {
                completed_ticks += 1;
                if completed_ticks == opts.ticks {
                    break;
                }
            }
        }
        self.running = false;
        if !opts.quiet {
            println!("\n{}", banner("Done."));
        }
        if opts.print_probes {
            println!("\n{}\n", banner("Probed values."));
            for probe in &self.probes {
                probe.print();
                println!();
            }
            println!("{}", banner("Done."));
        }
        if failed {
            self.print_errors();
        }
    }

    /// Depth-first reset of the whole tree back to build defaults, plus
    /// clock and probe history. Gate inputs are re-randomized, then
    /// everything re-stabilises.
    pub fn reset(&mut self) {
        self.device.reset_with(&self.log);
        self.global_tick = 0;
        let Self { clocks, probes, .. } = self;
        for clock in clocks.iter_mut() {
            for &probe_index in &clock.probes {
                probes[probe_index].reset();
            }
            clock.reset();
        }
    }

    fn update_specials(&mut self) {
        let Self {
            device,
            special_paths,
            log,
            ..
        } = self;
        for path in special_paths.iter() {
            let _ = device.update_special(path, log);
        }
    }

    fn tick_clocks(&mut self) {
        let Self {
            device,
            clocks,
            log,
            ..
        } = self;
        for clock in clocks.iter_mut() {
            clock.tick();
            let state = clock.state;
            for conn in &clock.connections {
                device.set_child_pin(conn.child, conn.pin, state, log);
            }
        }
    }

    /// End-of-tick sampling: every clock that ticked triggers its probes,
    /// stamped with the clock's pre-increment index.
    fn check_probe_triggers(&mut self) {
        let Self {
            device,
            clocks,
            probes,
            ..
        } = self;
        for clock in clocks.iter_mut() {
            if !clock.ticked {
                continue;
            }
            clock.ticked = false;
            if clock.probes.is_empty() {
                continue;
            }
            let timestamp = clock.index - 1;
            for &probe_index in &clock.probes {
                probes[probe_index].sample(timestamp, device);
            }
        }
    }

    fn print_messages(&self) {
        for message in self.log.take_messages() {
            println!("{message}");
        }
    }

    fn print_errors(&self) {
        let errors = self.log.error_strings();
        if errors.is_empty() {
            return;
        }
        println!("\n{}\n", banner("Error messages."));
        for (index, error) in errors.iter().enumerate() {
            println!("Error {index} : {error}");
        }
        println!("\n{}", banner("Done."));
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Removes a component anywhere in the tree by full name, reconciling
    /// connections, clock hookups and probes that referenced the removed
    /// subtree.
    pub fn remove_component(&mut self, full_component_name: &str) -> bool {
        let Some(path) = self.device.find_path(full_component_name) else {
            self.log.error(SimError::RemoveMissing {
                path: self.device.full_name().to_owned(),
                child: full_component_name.to_owned(),
            });
            return false;
        };
        let (parent_path, tail) = path.split_at(path.len() - 1);
        let removed = tail[0];
        {
            let parent = self
                .device
                .device_at_mut(parent_path)
                .expect("find_path returned a live path");
            let child_name = parent.children[removed].name().to_owned();
            parent.remove_child(&child_name);
            let pending = std::mem::take(&mut parent.pending_errors);
            self.log.extend_errors(pending);
        }
        // Clocks only reach top-level children.
        if parent_path.is_empty() {
            for clock in &mut self.clocks {
                clock.connections.retain(|c| c.child != removed);
                for conn in &mut clock.connections {
                    if conn.child > removed {
                        conn.child -= 1;
                    }
                }
            }
        }
        // Drop probes into the removed subtree, remap shifted siblings.
        let depth = parent_path.len();
        let in_removed_subtree = |target: &[usize]| {
            target.len() > depth && &target[..depth] == parent_path && target[depth] == removed
        };
        let mut remap = Vec::with_capacity(self.probes.len());
        let mut kept = Vec::with_capacity(self.probes.len());
        for mut probe in std::mem::take(&mut self.probes) {
            if in_removed_subtree(&probe.target_path) {
                remap.push(None);
                continue;
            }
            if probe.target_path.len() > depth
                && &probe.target_path[..depth] == parent_path
                && probe.target_path[depth] > removed
            {
                probe.target_path[depth] -= 1;
            }
            remap.push(Some(kept.len()));
            kept.push(probe);
        }
        self.probes = kept;
        for clock in &mut self.clocks {
            clock.probes = clock
                .probes
                .iter()
                .filter_map(|&old| remap[old])
                .collect();
        }
        self.register_special_paths();
        true
    }
}

#[cfg(test)]
mod tests;
