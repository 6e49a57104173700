//! Composite devices and the fixed-point solver.
//!
//! A `Device` owns its child components outright; the connection graph is a
//! separate layer of non-owning, `Copy` descriptors that are strictly local:
//! a descriptor can only name a child of the device that delivers it
//! (`Target::Child`) or that device itself (`Target::Parent`). Input-pin
//! ports are delivered by the device that owns the pin; output-pin ports and
//! gate connections are delivered by the owning parent while it drains its
//! propagation queues. This locality is what lets a plain ownership tree
//! carry an arbitrary connection graph.

use std::collections::HashMap;

use crate::error::{SimError, SimLog};
use crate::gate::{Gate, GateKind};
use crate::pin::{Pin, PinKind};
use crate::special::{PinAccess, SpecialDevice};

/// Solve budget for devices that do not override it.
pub const DEFAULT_MAX_PROPAGATIONS: usize = 100;

/// Threaded-solve configuration for a simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolverConfig {
    /// Solve pending sibling devices on worker threads.
    pub use_threads: bool,
    /// Nesting level whose devices hand their children to threads.
    pub threaded_solve_nesting_level: usize,
}

/// Where a connection points, relative to the device that delivers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Child(usize),
    Parent,
}

/// Connection descriptor: target component + target pin port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Conn {
    pub target: Target,
    pub pin: usize,
}

/// A child slot: primitive gate or nested device.
#[derive(Debug)]
pub(crate) enum Part {
    Gate(Gate),
    Device(Device),
}

impl Part {
    pub(crate) fn name(&self) -> &str {
        match self {
            Part::Gate(g) => g.name(),
            Part::Device(d) => &d.name,
        }
    }

    pub(crate) fn pins(&self) -> &[Pin] {
        match self {
            Part::Gate(g) => g.pins(),
            Part::Device(d) => &d.pins,
        }
    }

    pub(crate) fn pin_index(&self, pin_name: &str) -> Option<usize> {
        self.pins().iter().position(|p| p.name == pin_name)
    }
}

/// What a finished child solve asks of its parent.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SolveOutcome {
    /// Output pins changed: queue the child for propagation.
    pub propagate: bool,
    /// Input pins changed mid-solve: queue the child to be solved again.
    pub resolve: bool,
}

enum Enqueue {
    No,
    Propagate,
    Solve,
}

/// Where a freshly validated connection descriptor is stored.
enum WireStore {
    /// A port of this device's own pin.
    OwnPort(usize),
    /// A port of a child device's pin.
    ChildPort { child: usize, port: usize },
    /// A child gate's output connection list.
    GateConn(usize),
}

struct WireSpec<'a> {
    store: WireStore,
    origin_path: String,
    origin_kind: &'static str,
    origin_name: &'a str,
    nature: &'static str,
    target: Target,
    target_name: &'a str,
    target_pin: &'a str,
    /// Acceptable target pin kinds; empty skips the check (gate origins).
    required: &'static [PinKind],
    gate_style: bool,
}

#[derive(Debug)]
pub struct Device {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) kind: String,
    pub(crate) nesting_level: usize,
    pub(crate) pins: Vec<Pin>,
    /// Outbound connections per pin port index. Input-pin ports point into
    /// children; output-pin ports point at siblings or the parent.
    pub(crate) ports: Vec<Vec<Conn>>,
    in_pin_defaults: Vec<(String, bool)>,
    pub(crate) children: Vec<Part>,
    /// Indices of device children, for solve-order iteration and search.
    pub(crate) child_devices: Vec<usize>,
    propagate_this_tick: Vec<usize>,
    propagate_next_tick: Vec<usize>,
    solve_this_tick: Vec<usize>,
    /// Set while this device sits in its parent's solve queue.
    solve_pending: bool,
    /// Buffered output changes awaiting propagation by the parent.
    pub(crate) queued_for_propagation: bool,
    max_propagations: usize,
    /// This device solves its pending children on worker threads.
    threaded_children: bool,
    pub(crate) special: Option<Box<dyn SpecialDevice>>,
    /// Build errors accumulated while this tree is detached; drained into
    /// the simulation log when the tree is attached.
    pub(crate) pending_errors: Vec<SimError>,
}

impl Device {
    pub fn new(name: &str, kind: &str, in_pins: &[&str], out_pins: &[&str]) -> Self {
        let mut device = Self {
            name: name.to_owned(),
            full_name: name.to_owned(),
            kind: kind.to_owned(),
            nesting_level: 0,
            pins: Vec::new(),
            ports: Vec::new(),
            in_pin_defaults: Vec::new(),
            children: Vec::new(),
            child_devices: Vec::new(),
            propagate_this_tick: Vec::new(),
            propagate_next_tick: Vec::new(),
            solve_this_tick: Vec::new(),
            solve_pending: false,
            queued_for_propagation: false,
            max_propagations: DEFAULT_MAX_PROPAGATIONS,
            threaded_children: false,
            special: None,
            pending_errors: Vec::new(),
        };
        for pin_name in in_pins {
            device.push_pin(Pin::new(*pin_name, PinKind::Input, false, true));
        }
        device.push_pin(Pin::new("true", PinKind::HiddenInput, true, true));
        device.push_pin(Pin::new("false", PinKind::HiddenInput, false, true));
        for pin_name in out_pins {
            device.push_pin(Pin::new(*pin_name, PinKind::Output, false, true));
        }
        device.push_pin(Pin::new("all_stop", PinKind::HiddenOutput, false, false));
        device
    }

    #[must_use]
    pub fn with_in_pin_defaults(mut self, defaults: &[(&str, bool)]) -> Self {
        for (name, state) in defaults {
            self.in_pin_defaults.push(((*name).to_owned(), *state));
        }
        for pin in &mut self.pins {
            if pin.kind == PinKind::Input {
                if let Some((_, state)) = defaults.iter().find(|(n, _)| n == &pin.name) {
                    pin.state = *state;
                }
            }
        }
        self
    }

    #[must_use]
    pub fn with_max_propagations(mut self, max_propagations: usize) -> Self {
        self.max_propagations = max_propagations;
        self
    }

    fn push_pin(&mut self, pin: Pin) {
        self.pins.push(pin);
        self.ports.push(Vec::new());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn device_kind(&self) -> &str {
        &self.kind
    }

    pub fn pin_index(&self, pin_name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.name == pin_name)
    }

    pub fn pin_state(&self, pin_port_index: usize) -> bool {
        self.pins[pin_port_index].state
    }

    pub(crate) fn child_index(&self, child_name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name() == child_name)
    }

    pub(crate) fn set_threaded_children(&mut self, threaded: bool) {
        self.threaded_children = threaded;
    }

    pub(crate) fn set_max_propagations(&mut self, max_propagations: usize) {
        self.max_propagations = max_propagations;
    }

    pub(crate) fn record(&mut self, error: SimError) {
        tracing::debug!(%error, "build error");
        self.pending_errors.push(error);
    }

    /// Numbered pin group, e.g. `a_0`, `a_1`, ... Used by bus-oriented
    /// special devices.
    pub fn create_bus(
        &mut self,
        pin_count: usize,
        prefix: &str,
        kind: PinKind,
        defaults: &[(&str, bool)],
    ) {
        if !matches!(kind, PinKind::Input | PinKind::Output) {
            let path = self.full_name.clone();
            self.record(SimError::BusKind { path });
            return;
        }
        for index in 0..pin_count {
            let pin_name = format!("{prefix}{index}");
            let state = defaults
                .iter()
                .find(|(n, _)| *n == pin_name)
                .map(|(_, s)| *s)
                .unwrap_or(false);
            if kind == PinKind::Input {
                self.in_pin_defaults.push((pin_name.clone(), state));
            }
            self.push_pin(Pin::new(pin_name, kind, state, true));
        }
    }

    /// For special devices without internal components: flags every input
    /// pin as driving and every output pin as driven, so the end-of-build
    /// connection check stays quiet.
    pub fn mark_inner_terminals_connected(&mut self) {
        for pin in &mut self.pins {
            match pin.kind {
                PinKind::Input => pin.drive.output = true,
                PinKind::Output => pin.drive.input = true,
                _ => {}
            }
        }
    }

    pub fn set_special(&mut self, special: Box<dyn SpecialDevice>) {
        self.special = Some(special);
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    /// Adds a child device, transferring ownership. The child's subtree is
    /// re-rooted under this device and its accumulated build errors are
    /// adopted.
    pub fn add_component(&mut self, child: Device) {
        self.attach(child, &SolverConfig::default());
    }

    pub(crate) fn attach(&mut self, mut child: Device, solver: &SolverConfig) {
        child.reroot(&self.full_name, self.nesting_level + 1, solver);
        self.pending_errors.append(&mut child.pending_errors);
        let index = self.children.len();
        self.child_devices.push(index);
        self.children.push(Part::Device(child));
    }

    fn reroot(&mut self, parent_full_name: &str, level: usize, solver: &SolverConfig) {
        self.full_name = format!("{parent_full_name}:{}", self.name);
        self.nesting_level = level;
        self.threaded_children =
            solver.use_threads && level == solver.threaded_solve_nesting_level;
        for error in &mut self.pending_errors {
            error.qualify(parent_full_name);
        }
        let full_name = self.full_name.clone();
        for child in &mut self.children {
            if let Part::Device(device) = child {
                device.reroot(&full_name, level + 1, solver);
            }
        }
    }

    /// Adds a primitive gate. `Not` gates ignore `in_pins` and get the
    /// single input `input`; every other kind wants at least two inputs.
    pub fn add_gate(&mut self, gate_name: &str, kind: GateKind, in_pins: &[&str]) {
        if kind != GateKind::Not && in_pins.len() < 2 {
            let path = format!("{}:{gate_name}", self.full_name);
            self.record(SimError::GateArity {
                path,
                kind: kind.name(),
                count: in_pins.len(),
            });
        }
        self.children.push(Part::Gate(Gate::new(gate_name, kind, in_pins)));
    }

    /// Connects one of this device's input pins into a child component's
    /// input pin. Output-pin connections are made through the owning
    /// parent's [`child_connect`](Self::child_connect).
    pub fn connect(&mut self, origin_pin: &str, target_child: &str, target_pin: &str) {
        let Some(origin_index) = self.pin_index(origin_pin) else {
            let path = self.full_name.clone();
            self.record(SimError::ConnectOriginMissing {
                path,
                origin: origin_pin.to_owned(),
            });
            return;
        };
        let origin_kind = self.pins[origin_index].kind;
        if !origin_kind.is_input() {
            let path = self.full_name.clone();
            self.record(SimError::ConnectOriginKind {
                path,
                origin_kind: origin_kind.describe(),
                origin: origin_pin.to_owned(),
            });
            return;
        }
        let Some(child) = self.child_index(target_child) else {
            let path = self.full_name.clone();
            self.record(SimError::ConnectTargetMissing {
                path,
                origin_kind: origin_kind.describe(),
                origin: origin_pin.to_owned(),
                nature: "child",
                target: target_child.to_owned(),
            });
            return;
        };
        self.wire(WireSpec {
            store: WireStore::OwnPort(origin_index),
            origin_path: self.full_name.clone(),
            origin_kind: origin_kind.describe(),
            origin_name: origin_pin,
            nature: "child",
            target: Target::Child(child),
            target_name: target_child,
            target_pin,
            required: &[PinKind::Input],
            gate_style: false,
        });
    }

    /// Connects outward from a child component.
    ///
    /// For a gate child the parameters are `[target]` or `[target, pin]`
    /// (pin defaults to `input`); `target` may be a sibling name or
    /// `parent`. For a device child they are `[origin_pin, target]` or
    /// `[origin_pin, target, pin]`: an input origin delegates to the
    /// child's own [`connect`](Self::connect), an output origin wires to a
    /// sibling input or a parent output.
    pub fn child_connect(&mut self, child_name: &str, params: &[&str]) {
        let Some(child) = self.child_index(child_name) else {
            let path = self.full_name.clone();
            self.record(SimError::ChildMissing {
                path,
                action: "connect from",
                child: child_name.to_owned(),
            });
            return;
        };
        if matches!(self.children[child], Part::Gate(_)) {
            let (target_name, target_pin) = match params {
                [target] => (*target, "input"),
                [target, pin] => (*target, *pin),
                _ => {
                    let path = format!("{}:{child_name}", self.full_name);
                    self.record(SimError::ConnectParams { kind: "Gate", path });
                    return;
                }
            };
            self.gate_connect(child, target_name, target_pin);
        } else {
            let (origin_pin, target_name, target_pin) = match params {
                [origin, target] => (*origin, *target, "input"),
                [origin, target, pin] => (*origin, *target, *pin),
                _ => {
                    let path = format!("{}:{child_name}", self.full_name);
                    self.record(SimError::ConnectParams { kind: "Device", path });
                    return;
                }
            };
            self.device_child_connect(child, origin_pin, target_name, target_pin);
        }
    }

    fn gate_connect(&mut self, gate_index: usize, target_name: &str, target_pin: &str) {
        let gate_path = format!("{}:{}", self.full_name, self.children[gate_index].name());
        let target = if target_name == "parent" {
            Target::Parent
        } else {
            match self.child_index(target_name) {
                Some(i) => Target::Child(i),
                None => {
                    self.record(SimError::GateTargetMissing {
                        path: gate_path,
                        target: target_name.to_owned(),
                    });
                    return;
                }
            }
        };
        self.wire(WireSpec {
            store: WireStore::GateConn(gate_index),
            origin_path: gate_path,
            origin_kind: "output",
            origin_name: "output",
            nature: "sibling",
            target,
            target_name,
            target_pin,
            required: &[],
            gate_style: true,
        });
    }

    fn device_child_connect(
        &mut self,
        child: usize,
        origin_pin: &str,
        target_name: &str,
        target_pin: &str,
    ) {
        let child_path = format!("{}:{}", self.full_name, self.children[child].name());
        let Some(origin_index) = self.children[child].pin_index(origin_pin) else {
            self.record(SimError::ConnectOriginMissing {
                path: child_path,
                origin: origin_pin.to_owned(),
            });
            return;
        };
        let origin_kind = self.children[child].pins()[origin_index].kind;
        match origin_kind {
            // Input origins drive into the child's own children; the child
            // has everything it needs to validate that itself.
            PinKind::Input | PinKind::HiddenInput => {
                let Part::Device(device) = &mut self.children[child] else {
                    return;
                };
                device.connect(origin_pin, target_name, target_pin);
                let mut adopted = std::mem::take(&mut device.pending_errors);
                self.pending_errors.append(&mut adopted);
            }
            PinKind::Output => {
                let (target, nature, required): (_, _, &'static [PinKind]) =
                    if target_name == "parent" {
                        (
                            Target::Parent,
                            "parent",
                            &[PinKind::Output, PinKind::HiddenOutput],
                        )
                    } else {
                        match self.child_index(target_name) {
                            Some(i) => (Target::Child(i), "sibling", &[PinKind::Input]),
                            None => {
                                self.record(SimError::ConnectTargetMissing {
                                    path: child_path,
                                    origin_kind: origin_kind.describe(),
                                    origin: origin_pin.to_owned(),
                                    nature: "sibling",
                                    target: target_name.to_owned(),
                                });
                                return;
                            }
                        }
                    };
                self.wire(WireSpec {
                    store: WireStore::ChildPort {
                        child,
                        port: origin_index,
                    },
                    origin_path: child_path,
                    origin_kind: origin_kind.describe(),
                    origin_name: origin_pin,
                    nature,
                    target,
                    target_name,
                    target_pin,
                    required,
                    gate_style: false,
                });
            }
            PinKind::HiddenOutput => {
                self.record(SimError::ConnectOriginKind {
                    path: child_path,
                    origin_kind: origin_kind.describe(),
                    origin: origin_pin.to_owned(),
                });
            }
        }
    }

    /// Shared validation tail for all connection forms: target pin must
    /// exist, be type-compatible, not already connected, and not already
    /// driven. Exactly one error is logged per failed attempt; a success
    /// stores the descriptor and flips both drive flags.
    fn wire(&mut self, spec: WireSpec<'_>) {
        let target_pins: &[Pin] = match spec.target {
            Target::Parent => &self.pins,
            Target::Child(i) => self.children[i].pins(),
        };
        let Some(pin_index) = target_pins.iter().position(|p| p.name == spec.target_pin) else {
            if spec.gate_style {
                self.record(SimError::GatePinMissing {
                    path: spec.origin_path,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            } else {
                self.record(SimError::ConnectPinMissing {
                    path: spec.origin_path,
                    origin_kind: spec.origin_kind,
                    origin: spec.origin_name.to_owned(),
                    nature: spec.nature,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            }
            return;
        };
        let target_kind = target_pins[pin_index].kind;
        let target_driven = target_pins[pin_index].drive.input;
        if !spec.required.is_empty() && !spec.required.contains(&target_kind) {
            self.record(SimError::ConnectIncompatible {
                path: spec.origin_path,
                origin_kind: spec.origin_kind,
                origin: spec.origin_name.to_owned(),
                nature: spec.nature,
                target: spec.target_name.to_owned(),
                target_kind: target_kind.describe(),
                pin: spec.target_pin.to_owned(),
            });
            return;
        }
        let conn = Conn {
            target: spec.target,
            pin: pin_index,
        };
        let duplicate = match &spec.store {
            WireStore::OwnPort(port) => self.ports[*port].contains(&conn),
            WireStore::ChildPort { child, port } => match &self.children[*child] {
                Part::Device(d) => d.ports[*port].contains(&conn),
                Part::Gate(_) => false,
            },
            WireStore::GateConn(gate) => match &self.children[*gate] {
                Part::Gate(g) => g.connections.contains(&conn),
                Part::Device(_) => false,
            },
        };
        if duplicate {
            if spec.gate_style {
                self.record(SimError::GateDuplicate {
                    path: spec.origin_path,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            } else {
                self.record(SimError::ConnectDuplicate {
                    path: spec.origin_path,
                    origin_kind: spec.origin_kind,
                    origin: spec.origin_name.to_owned(),
                    nature: spec.nature,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            }
            return;
        }
        if target_driven {
            if spec.gate_style {
                self.record(SimError::GateDriven {
                    path: spec.origin_path,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            } else {
                self.record(SimError::ConnectDriven {
                    path: spec.origin_path,
                    origin_kind: spec.origin_kind,
                    origin: spec.origin_name.to_owned(),
                    nature: spec.nature,
                    target: spec.target_name.to_owned(),
                    pin: spec.target_pin.to_owned(),
                });
            }
            return;
        }
        // Store the descriptor and mark both ends driven.
        match &spec.store {
            WireStore::OwnPort(port) => self.ports[*port].push(conn),
            WireStore::ChildPort { child, port } => {
                if let Part::Device(d) = &mut self.children[*child] {
                    d.ports[*port].push(conn);
                }
            }
            WireStore::GateConn(gate) => {
                if let Part::Gate(g) = &mut self.children[*gate] {
                    g.connections.push(conn);
                }
            }
        }
        match spec.target {
            Target::Parent => self.pins[pin_index].drive.input = true,
            Target::Child(i) => match &mut self.children[i] {
                Part::Gate(g) => g.pins_mut()[pin_index].drive.input = true,
                Part::Device(d) => d.pins[pin_index].drive.input = true,
            },
        }
        match &spec.store {
            WireStore::OwnPort(port) => self.pins[*port].drive.output = true,
            WireStore::ChildPort { child, port } => {
                if let Part::Device(d) = &mut self.children[*child] {
                    d.pins[*port].drive.output = true;
                }
            }
            WireStore::GateConn(gate) => {
                if let Part::Gate(g) = &mut self.children[*gate] {
                    let out = g.out_index();
                    g.pins_mut()[out].drive.output = true;
                }
            }
        }
    }

    /// Drives a named pin of a named child, applying normal queueing. Does
    /// not solve; `Simulation::child_set` follows up with a top-level solve
    /// when the simulation is idle.
    pub fn child_set(&mut self, child_name: &str, pin_name: &str, state: bool) {
        let log = SimLog::default();
        self.child_set_with(child_name, pin_name, state, &log);
        self.pending_errors.extend(log.errors());
    }

    pub(crate) fn child_set_with(
        &mut self,
        child_name: &str,
        pin_name: &str,
        state: bool,
        log: &SimLog,
    ) {
        let Some(child) = self.child_index(child_name) else {
            let path = self.full_name.clone();
            self.record(SimError::ChildMissing {
                path,
                action: "set a pin of",
                child: child_name.to_owned(),
            });
            return;
        };
        let Some(pin) = self.children[child].pin_index(pin_name) else {
            let path = self.full_name.clone();
            self.record(SimError::ChildPinMissing {
                path,
                action: "set",
                child: child_name.to_owned(),
                pin: pin_name.to_owned(),
            });
            return;
        };
        self.set_child_pin(child, pin, state, log);
    }

    /// Declares a child output intentionally unconnected, so the
    /// end-of-build report does not flag it.
    pub fn child_mark_output_unused(&mut self, child_name: &str, out_pin_name: &str) {
        let Some(child) = self.child_index(child_name) else {
            let path = self.full_name.clone();
            self.record(SimError::ChildMissing {
                path,
                action: "mark an output of",
                child: child_name.to_owned(),
            });
            return;
        };
        let found = match &mut self.children[child] {
            Part::Gate(g) => g
                .pin_index(out_pin_name)
                .filter(|i| g.pins()[*i].kind == PinKind::Output)
                .map(|i| {
                    g.pins_mut()[i].drive.output = true;
                }),
            Part::Device(d) => d
                .pin_index(out_pin_name)
                .filter(|i| d.pins[*i].kind == PinKind::Output)
                .map(|i| {
                    d.pins[i].drive.output = true;
                }),
        };
        if found.is_none() {
            let path = self.full_name.clone();
            self.record(SimError::ChildPinMissing {
                path,
                action: "mark",
                child: child_name.to_owned(),
                pin: out_pin_name.to_owned(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Solving
    // ------------------------------------------------------------------

    /// Settles internal state after building: every child is initialised so
    /// it propagates at least once, then the fixed-point solve runs.
    pub fn stabilise(&mut self) {
        let log = SimLog::default();
        self.stabilise_with(&log);
        self.pending_errors.extend(log.errors());
    }

    pub(crate) fn stabilise_with(&mut self, log: &SimLog) {
        for index in 0..self.children.len() {
            match &mut self.children[index] {
                Part::Gate(gate) => gate.initialise(),
                Part::Device(device) => device.initialise(),
            }
            self.propagate_next_tick.push(index);
        }
        let _ = self.solve(log);
    }

    /// Flags every output pin changed so the parent's stabilise pushes this
    /// device's settled outputs over fresh connections, overwriting the
    /// random build-time gate inputs of siblings.
    pub(crate) fn initialise(&mut self) {
        for pin in &mut self.pins {
            if pin.kind == PinKind::Output {
                pin.state_changed = true;
            }
        }
    }

    /// The fixed-point loop: push pending input edges into the children
    /// once, then alternate sub-tick propagation with recursive child
    /// solves until nothing is pending or the budget runs out.
    pub(crate) fn solve(&mut self, log: &SimLog) -> SolveOutcome {
        if let Some(mut special) = self.special.take() {
            let mut access = PinAccess::new(
                &mut self.pins,
                &mut self.queued_for_propagation,
                &self.full_name,
                log,
            );
            special.solve(&mut access);
            self.special = Some(special);
        }
        self.solve_pending = false;
        let mut sub_tick_count = 0usize;
        self.propagate_inputs(log);
        loop {
            while !self.propagate_next_tick.is_empty() && sub_tick_count <= self.max_propagations {
                self.sub_tick(log);
                sub_tick_count += 1;
            }
            if sub_tick_count > self.max_propagations {
                log.error(SimError::Unstable {
                    path: self.full_name.clone(),
                    budget: self.max_propagations,
                });
                break;
            }
            let pending = std::mem::take(&mut self.solve_this_tick);
            if self.threaded_children && pending.len() > 1 {
                self.solve_children_threaded(&pending, log);
            } else {
                for &index in &pending {
                    let outcome = match &mut self.children[index] {
                        Part::Device(device) => device.solve(log),
                        Part::Gate(_) => continue,
                    };
                    self.apply_child_outcome(index, outcome);
                }
            }
            if self.propagate_next_tick.is_empty() {
                break;
            }
        }
        SolveOutcome {
            propagate: self.queued_for_propagation,
            resolve: self.solve_pending,
        }
    }

    /// Solves pending child devices on scoped worker threads and applies
    /// their outcomes serially, in queue order, after the join barrier.
    /// Sibling subtrees are disjoint `&mut` borrows; the shared log is the
    /// only common state and carries its own lock.
    fn solve_children_threaded(&mut self, pending: &[usize], log: &SimLog) {
        let mut slots: HashMap<usize, &mut Device> = HashMap::with_capacity(pending.len());
        for (index, child) in self.children.iter_mut().enumerate() {
            if pending.contains(&index) {
                if let Part::Device(device) = child {
                    slots.insert(index, device);
                }
            }
        }
        let outcomes: Vec<(usize, SolveOutcome)> = std::thread::scope(|scope| {
            let handles: Vec<_> = pending
                .iter()
                .filter_map(|&index| {
                    let child = slots.remove(&index)?;
                    Some((index, scope.spawn(move || child.solve(log))))
                })
                .collect();
            handles
                .into_iter()
                .map(|(index, handle)| (index, handle.join().expect("child solve panicked")))
                .collect()
        });
        for (index, outcome) in outcomes {
            self.apply_child_outcome(index, outcome);
        }
    }

    fn apply_child_outcome(&mut self, index: usize, outcome: SolveOutcome) {
        if outcome.propagate {
            self.propagate_next_tick.push(index);
        }
        if outcome.resolve {
            self.solve_this_tick.push(index);
        }
    }

    /// One propagation wave: everything queued during the previous wave
    /// runs together, in insertion order, never interleaved with newly
    /// queued work.
    fn sub_tick(&mut self, log: &SimLog) {
        std::mem::swap(&mut self.propagate_this_tick, &mut self.propagate_next_tick);
        let mut queue = std::mem::take(&mut self.propagate_this_tick);
        for index in queue.drain(..) {
            let is_gate = matches!(self.children[index], Part::Gate(_));
            if is_gate {
                self.propagate_gate(index, log);
            } else {
                self.propagate_device(index, log);
            }
        }
        // Hand the drained buffer back to keep its allocation.
        self.propagate_this_tick = queue;
    }

    /// Pushes pending edges on this device's own input pins into the
    /// children, once per solve.
    fn propagate_inputs(&mut self, log: &SimLog) {
        let mut ports = std::mem::take(&mut self.ports);
        for pin_index in 0..self.pins.len() {
            let state = {
                let pin = &mut self.pins[pin_index];
                if !pin.kind.is_input() || !pin.state_changed {
                    continue;
                }
                pin.state_changed = false;
                pin.state
            };
            for &conn in &ports[pin_index] {
                self.deliver(conn, state, log);
            }
        }
        self.ports = ports;
    }

    fn propagate_gate(&mut self, index: usize, log: &SimLog) {
        let (state, connections) = {
            let Part::Gate(gate) = &mut self.children[index] else {
                return;
            };
            gate.queued = false;
            let out = gate.out_index();
            if !gate.pins()[out].state_changed {
                return;
            }
            gate.pins_mut()[out].state_changed = false;
            let state = gate.pins()[out].state;
            (state, std::mem::take(&mut gate.connections))
        };
        for &conn in &connections {
            self.deliver(conn, state, log);
        }
        if let Part::Gate(gate) = &mut self.children[index] {
            gate.connections = connections;
        }
    }

    fn propagate_device(&mut self, index: usize, log: &SimLog) {
        let (pin_count, ports) = {
            let Part::Device(device) = &mut self.children[index] else {
                return;
            };
            device.queued_for_propagation = false;
            (device.pins.len(), std::mem::take(&mut device.ports))
        };
        for pin_index in 0..pin_count {
            let state = {
                let Part::Device(device) = &mut self.children[index] else {
                    break;
                };
                let pin = &mut device.pins[pin_index];
                if pin.kind != PinKind::Output || !pin.state_changed {
                    continue;
                }
                pin.state_changed = false;
                pin.state
            };
            for &conn in &ports[pin_index] {
                self.deliver(conn, state, log);
            }
        }
        if let Part::Device(device) = &mut self.children[index] {
            device.ports = ports;
        }
    }

    fn deliver(&mut self, conn: Conn, state: bool, log: &SimLog) {
        match conn.target {
            Target::Child(index) => self.set_child_pin(index, conn.pin, state, log),
            Target::Parent => {
                let _ = self.receive(conn.pin, state, log);
            }
        }
    }

    /// Drives one pin of one child, applying the queueing rules: a gate
    /// whose output changed joins the propagation queue, a device whose
    /// input changed joins the solve queue.
    pub(crate) fn set_child_pin(&mut self, index: usize, pin: usize, state: bool, log: &SimLog) {
        let enqueue = match &mut self.children[index] {
            Part::Gate(gate) => {
                if gate.set(pin, state) {
                    Enqueue::Propagate
                } else {
                    Enqueue::No
                }
            }
            Part::Device(device) => device.receive(pin, state, log),
        };
        match enqueue {
            Enqueue::Propagate => self.propagate_next_tick.push(index),
            Enqueue::Solve => self.solve_this_tick.push(index),
            Enqueue::No => {}
        }
    }

    /// `Set` on one of this device's own pins. Input changes request a
    /// (re-)solve; output changes are buffered until the parent's next
    /// sub-tick; asserting `all_stop` logs the fatal error that halts the
    /// run loop.
    fn receive(&mut self, pin_index: usize, state: bool, log: &SimLog) -> Enqueue {
        match self.pins[pin_index].kind {
            PinKind::Input => {
                if self.pins[pin_index].state != state {
                    self.pins[pin_index].state = state;
                    self.pins[pin_index].state_changed = true;
                    if !self.solve_pending {
                        self.solve_pending = true;
                        return Enqueue::Solve;
                    }
                }
                Enqueue::No
            }
            PinKind::Output => {
                if self.pins[pin_index].state != state {
                    self.pins[pin_index].state = state;
                    self.pins[pin_index].state_changed = true;
                    self.queued_for_propagation = true;
                }
                Enqueue::No
            }
            PinKind::HiddenOutput => {
                if self.pins[pin_index].name == "all_stop" && state {
                    log.error(SimError::AllStop {
                        path: self.full_name.clone(),
                    });
                }
                Enqueue::No
            }
            // The `true`/`false` pins never change state.
            PinKind::HiddenInput => Enqueue::No,
        }
    }

    // ------------------------------------------------------------------
    // Reporting, reset, search
    // ------------------------------------------------------------------

    /// Logs every pin left unconnected after build. Boundary pins of
    /// first-level components are exempt on the side that would face the
    /// outside world.
    pub(crate) fn report_unconnected_pins(&self, log: &SimLog) {
        for pin in &self.pins {
            match pin.kind {
                PinKind::Input => {
                    if !pin.drive.input && self.nesting_level > 1 {
                        log.error(SimError::InPinUndriven {
                            kind: "Device",
                            path: self.full_name.clone(),
                            pin: pin.name.clone(),
                        });
                    }
                    if !pin.drive.output {
                        log.error(SimError::InPinUndriving {
                            path: self.full_name.clone(),
                            pin: pin.name.clone(),
                        });
                    }
                }
                PinKind::Output => {
                    if !pin.drive.input {
                        log.error(SimError::OutPinUndriven {
                            path: self.full_name.clone(),
                            pin: pin.name.clone(),
                        });
                    }
                    if !pin.drive.output && self.nesting_level > 1 {
                        log.error(SimError::OutPinUndriving {
                            kind: "Device",
                            path: self.full_name.clone(),
                            pin: pin.name.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        for child in &self.children {
            match child {
                Part::Device(device) => device.report_unconnected_pins(log),
                Part::Gate(gate) => {
                    let path = format!("{}:{}", self.full_name, gate.name());
                    for pin in gate.pins() {
                        match pin.kind {
                            PinKind::Input if !pin.drive.input => {
                                log.error(SimError::InPinUndriven {
                                    kind: "Gate",
                                    path: path.clone(),
                                    pin: pin.name.clone(),
                                });
                            }
                            PinKind::Output
                                if !pin.drive.output && self.nesting_level + 1 > 1 =>
                            {
                                log.error(SimError::OutPinUndriving {
                                    kind: "Gate",
                                    path: path.clone(),
                                    pin: pin.name.clone(),
                                });
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    /// Depth-first reset: child devices first, then this device's pins back
    /// to their defaults, then child gates, then a fresh stabilise.
    pub fn reset(&mut self) {
        let log = SimLog::default();
        self.reset_with(&log);
        self.pending_errors.extend(log.errors());
    }

    pub(crate) fn reset_with(&mut self, log: &SimLog) {
        for index in 0..self.children.len() {
            if let Part::Device(device) = &mut self.children[index] {
                device.reset_with(log);
            }
        }
        for pin_index in 0..self.pins.len() {
            self.reset_pin(pin_index);
        }
        for child in &mut self.children {
            if let Part::Gate(gate) = child {
                gate.reset();
            }
        }
        self.stabilise_with(log);
    }

    fn reset_pin(&mut self, pin_index: usize) {
        let default = {
            let pin = &self.pins[pin_index];
            self.in_pin_defaults
                .iter()
                .find(|(n, _)| *n == pin.name)
                .map(|(_, s)| *s)
        };
        let pin = &mut self.pins[pin_index];
        match pin.kind {
            PinKind::HiddenInput => {
                pin.state = pin.name == "true";
                pin.state_changed = true;
            }
            PinKind::HiddenOutput => {
                pin.state = false;
                pin.state_changed = false;
            }
            _ => {
                pin.state = default.unwrap_or(false);
                pin.state_changed = true;
            }
        }
    }

    pub(crate) fn part_at(&self, path: &[usize]) -> Option<&Part> {
        let (&head, rest) = path.split_first()?;
        let child = self.children.get(head)?;
        if rest.is_empty() {
            Some(child)
        } else {
            match child {
                Part::Device(device) => device.part_at(rest),
                Part::Gate(_) => None,
            }
        }
    }

    pub(crate) fn device_at_mut(&mut self, path: &[usize]) -> Option<&mut Device> {
        if path.is_empty() {
            return Some(self);
        }
        let (&head, rest) = path.split_first()?;
        match self.children.get_mut(head)? {
            Part::Device(device) => device.device_at_mut(rest),
            Part::Gate(_) => None,
        }
    }

    /// Depth-first search for a component by colon-joined full name.
    pub(crate) fn find_path(&self, target_full_name: &str) -> Option<Vec<usize>> {
        for (index, child) in self.children.iter().enumerate() {
            let child_full = format!("{}:{}", self.full_name, child.name());
            if child_full == target_full_name {
                return Some(vec![index]);
            }
            if let Part::Device(device) = child {
                if target_full_name.starts_with(&format!("{child_full}:")) {
                    if let Some(mut rest) = device.find_path(target_full_name) {
                        rest.insert(0, index);
                        return Some(rest);
                    }
                }
            }
        }
        None
    }

    pub(crate) fn collect_special_paths(&self, base: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        for (index, child) in self.children.iter().enumerate() {
            if let Part::Device(device) = child {
                base.push(index);
                if device.special.is_some() {
                    out.push(base.clone());
                }
                device.collect_special_paths(base, out);
                base.pop();
            }
        }
    }

    /// Runs the per-tick `update` of the special device at `path` and, if
    /// it changed any pins, queues the path's devices so the next top-level
    /// solve revisits the subtree. Returns whether anything changed.
    pub(crate) fn update_special(&mut self, path: &[usize], log: &SimLog) -> bool {
        let Some((&head, rest)) = path.split_first() else {
            return false;
        };
        if rest.is_empty() {
            let (dirty_in, dirty_out) = {
                let Part::Device(child) = &mut self.children[head] else {
                    return false;
                };
                let Some(mut special) = child.special.take() else {
                    return false;
                };
                let mut access = PinAccess::new(
                    &mut child.pins,
                    &mut child.queued_for_propagation,
                    &child.full_name,
                    log,
                );
                special.update(&mut access);
                let dirty = access.dirty();
                child.special = Some(special);
                dirty
            };
            if dirty_out {
                self.propagate_next_tick.push(head);
            }
            if dirty_in {
                self.queue_child_solve(head);
            }
            dirty_in || dirty_out
        } else {
            let dirty = {
                let Part::Device(child) = &mut self.children[head] else {
                    return false;
                };
                child.update_special(rest, log)
            };
            if dirty {
                self.queue_child_solve(head);
            }
            dirty
        }
    }

    fn queue_child_solve(&mut self, index: usize) {
        if let Part::Device(child) = &mut self.children[index] {
            if !child.solve_pending {
                child.solve_pending = true;
                self.solve_this_tick.push(index);
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Removes one child and reconciles the connection layer: the removed
    /// component's outbound targets lose their driven flag, inbound
    /// descriptors are dropped (clearing the origin's drives flag when a
    /// port empties), and sibling indices above the removed slot shift
    /// down.
    pub fn remove_child(&mut self, child_name: &str) -> bool {
        let Some(removed) = self.child_index(child_name) else {
            let path = self.full_name.clone();
            self.record(SimError::RemoveMissing {
                path,
                child: child_name.to_owned(),
            });
            return false;
        };
        // Outbound: clear drive.input on every target outside the subtree.
        let outbound: Vec<Conn> = match &self.children[removed] {
            Part::Gate(gate) => gate.connections.clone(),
            Part::Device(device) => device
                .pins
                .iter()
                .enumerate()
                .filter(|(_, p)| p.kind == PinKind::Output)
                .flat_map(|(i, _)| device.ports[i].iter().copied())
                .collect(),
        };
        for conn in outbound {
            match conn.target {
                Target::Parent => self.pins[conn.pin].drive.input = false,
                Target::Child(i) if i != removed => match &mut self.children[i] {
                    Part::Gate(g) => g.pins_mut()[conn.pin].drive.input = false,
                    Part::Device(d) => d.pins[conn.pin].drive.input = false,
                },
                Target::Child(_) => {}
            }
        }
        // Inbound: drop descriptors pointing at the removed child from this
        // device's own ports and from every sibling.
        let target = Target::Child(removed);
        for port in 0..self.ports.len() {
            let before = self.ports[port].len();
            self.ports[port].retain(|c| c.target != target);
            if self.ports[port].is_empty() && before > 0 {
                self.pins[port].drive.output = false;
            }
        }
        for index in 0..self.children.len() {
            if index == removed {
                continue;
            }
            match &mut self.children[index] {
                Part::Gate(gate) => {
                    let before = gate.connections.len();
                    gate.connections.retain(|c| c.target != target);
                    if gate.connections.is_empty() && before > 0 {
                        let out = gate.out_index();
                        gate.pins_mut()[out].drive.output = false;
                    }
                }
                Part::Device(device) => {
                    for port in 0..device.ports.len() {
                        if device.pins[port].kind != PinKind::Output {
                            continue;
                        }
                        let before = device.ports[port].len();
                        device.ports[port].retain(|c| c.target != target);
                        if device.ports[port].is_empty() && before > 0 {
                            device.pins[port].drive.output = false;
                        }
                    }
                }
            }
        }
        // Drop the child and shift every index above it.
        self.children.remove(removed);
        self.child_devices.retain(|&i| i != removed);
        for index in &mut self.child_devices {
            if *index > removed {
                *index -= 1;
            }
        }
        let remap = |conn: &mut Conn| {
            if let Target::Child(i) = &mut conn.target {
                if *i > removed {
                    *i -= 1;
                }
            }
        };
        for port in &mut self.ports {
            port.iter_mut().for_each(remap);
        }
        for child in &mut self.children {
            match child {
                Part::Gate(gate) => gate.connections.iter_mut().for_each(remap),
                Part::Device(device) => {
                    for port in &mut device.ports {
                        port.iter_mut().for_each(remap);
                    }
                }
            }
        }
        let shift = |queue: &mut Vec<usize>| {
            queue.retain(|&i| i != removed);
            for index in queue {
                if *index > removed {
                    *index -= 1;
                }
            }
        };
        shift(&mut self.propagate_this_tick);
        shift(&mut self.propagate_next_tick);
        shift(&mut self.solve_this_tick);
        true
    }
}

#[cfg(test)]
mod tests;
