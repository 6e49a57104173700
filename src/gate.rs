//! Primitive logic gates.
//!
//! A gate is the leaf component of the tree: a row of input pins, one output
//! pin (always the last port index), and a pure boolean function. Gates are
//! event-driven — `set` re-evaluates immediately, and a gate asks to be
//! re-queued for propagation only when its output actually changes.

use rand::Rng;

use crate::device::Conn;
use crate::pin::{Pin, PinKind};

/// The boolean operation a [`Gate`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    And,
    Nand,
    Or,
    Nor,
    Not,
}

impl GateKind {
    pub fn name(self) -> &'static str {
        match self {
            GateKind::And => "and",
            GateKind::Nand => "nand",
            GateKind::Or => "or",
            GateKind::Nor => "nor",
            GateKind::Not => "not",
        }
    }
}

impl std::str::FromStr for GateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(GateKind::And),
            "nand" => Ok(GateKind::Nand),
            "or" => Ok(GateKind::Or),
            "nor" => Ok(GateKind::Nor),
            "not" => Ok(GateKind::Not),
            other => Err(format!("no such gate kind: {other}")),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Gate {
    name: String,
    kind: GateKind,
    /// Input pins in caller order, then the output pin.
    pins: Vec<Pin>,
    out_index: usize,
    /// Outbound connections from the output pin, resolved against the
    /// mediating parent device (`Target::Child` = sibling).
    pub(crate) connections: Vec<Conn>,
    /// True while this gate sits in one of the parent's propagation queues.
    pub(crate) queued: bool,
}

impl Gate {
    /// Builds a gate with randomly seeded input states. The random seeds
    /// exercise convergence during `stabilise`; every driven input is
    /// overwritten on the first propagation pass.
    ///
    /// A `Not` gate always gets the single input pin `input`.
    pub(crate) fn new(name: impl Into<String>, kind: GateKind, in_pin_names: &[&str]) -> Self {
        let mut rng = rand::rng();
        let names: Vec<&str> = if kind == GateKind::Not {
            vec!["input"]
        } else {
            in_pin_names.to_vec()
        };
        let mut pins: Vec<Pin> = names
            .iter()
            .map(|n| Pin::new(*n, PinKind::Input, rng.random(), false))
            .collect();
        let out_index = pins.len();
        pins.push(Pin::new("output", PinKind::Output, false, false));
        Self {
            name: name.into(),
            kind,
            pins,
            out_index,
            connections: Vec::new(),
            queued: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> GateKind {
        self.kind
    }

    pub(crate) fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub(crate) fn pins_mut(&mut self) -> &mut [Pin] {
        &mut self.pins
    }

    pub(crate) fn out_index(&self) -> usize {
        self.out_index
    }

    pub(crate) fn in_pin_count(&self) -> usize {
        self.out_index
    }

    pub(crate) fn pin_index(&self, pin_name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.name == pin_name)
    }

    /// The pure boolean function of the input pins.
    fn operate(&self) -> bool {
        let inputs = &self.pins[..self.out_index];
        match self.kind {
            GateKind::And => inputs.iter().all(|p| p.state),
            GateKind::Nand => !inputs.iter().all(|p| p.state),
            GateKind::Or => inputs.iter().any(|p| p.state),
            GateKind::Nor => !inputs.iter().any(|p| p.state),
            GateKind::Not => !self.pins[0].state,
        }
    }

    /// Computes the output from the (random) initial inputs and flags it for
    /// a one-shot propagation, so every gate settles at least once during
    /// the parent's `stabilise`.
    pub(crate) fn initialise(&mut self) {
        let state = self.operate();
        let out = &mut self.pins[self.out_index];
        out.state = state;
        out.state_changed = true;
    }

    /// Drives one input pin. Returns true when the resulting output change
    /// means the parent must queue this gate for propagation.
    pub(crate) fn set(&mut self, pin_port_index: usize, state: bool) -> bool {
        if self.pins[pin_port_index].state == state {
            return false;
        }
        self.pins[pin_port_index].state = state;
        self.evaluate()
    }

    fn evaluate(&mut self) -> bool {
        let new_state = self.operate();
        let out = &mut self.pins[self.out_index];
        if out.state == new_state {
            return false;
        }
        out.state = new_state;
        out.state_changed = true;
        if self.queued {
            false
        } else {
            self.queued = true;
            true
        }
    }

    /// Back to construction state: random inputs, output low, no pending
    /// edges.
    pub(crate) fn reset(&mut self) {
        let mut rng = rand::rng();
        for pin in &mut self.pins {
            pin.state = if pin.kind == PinKind::Input {
                rng.random()
            } else {
                false
            };
            pin.state_changed = false;
        }
        self.queued = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build-time inputs are random; `initialise` computes the matching
    /// output, after which `set` keeps it consistent.
    fn new_gate(kind: GateKind, in_pins: &[&str]) -> Gate {
        let mut gate = Gate::new("g", kind, in_pins);
        gate.initialise();
        gate
    }

    fn settle(gate: &mut Gate, inputs: &[bool]) -> bool {
        for (i, state) in inputs.iter().enumerate() {
            gate.set(i, *state);
        }
        gate.pins()[gate.out_index()].state
    }

    #[test]
    fn truth_tables() {
        let cases: &[(GateKind, [bool; 4])] = &[
            // out for (F,F) (F,T) (T,F) (T,T)
            (GateKind::And, [false, false, false, true]),
            (GateKind::Nand, [true, true, true, false]),
            (GateKind::Or, [false, true, true, true]),
            (GateKind::Nor, [true, false, false, false]),
        ];
        for (kind, expect) in cases {
            let mut gate = new_gate(*kind, &["input_0", "input_1"]);
            for (i, (a, b)) in [(false, false), (false, true), (true, false), (true, true)]
                .into_iter()
                .enumerate()
            {
                assert_eq!(
                    settle(&mut gate, &[a, b]),
                    expect[i],
                    "{} ({a}, {b})",
                    kind.name()
                );
            }
        }
    }

    #[test]
    fn inverter_has_fixed_input_pin() {
        let mut gate = new_gate(GateKind::Not, &["ignored"]);
        assert_eq!(gate.in_pin_count(), 1);
        assert_eq!(gate.pin_index("input"), Some(0));
        assert!(settle(&mut gate, &[false]));
        assert!(!settle(&mut gate, &[true]));
    }

    #[test]
    fn output_change_requests_queueing_once() {
        let mut gate = new_gate(GateKind::And, &["input_0", "input_1"]);
        gate.set(0, true);
        gate.set(1, false);
        let out_before = gate.pins()[gate.out_index()].state;
        assert!(!out_before);
        let out_index = gate.out_index();
        gate.pins_mut()[out_index].state_changed = false;
        gate.queued = false;

        // First change queues, the second (while still queued) does not.
        assert!(gate.set(1, true));
        assert!(gate.pins()[gate.out_index()].state_changed);
        assert!(!gate.set(1, false));
        // No change at all never queues.
        gate.queued = false;
        assert!(!gate.set(0, true));
    }

    #[test]
    fn reset_clears_output_and_edges() {
        let mut gate = Gate::new("g", GateKind::Or, &["input_0", "input_1"]);
        gate.set(0, true);
        gate.reset();
        assert!(!gate.pins()[gate.out_index()].state);
        assert!(gate.pins().iter().all(|p| !p.state_changed));
    }
}
