//! Pin data model.
//!
//! A pin is a named boolean terminal on a component. The solver works on
//! change flags: a pin whose `state_changed` flag is set has a pending edge
//! that has not yet been pushed to its downstream targets.

/// Pin role on its owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// User-visible input.
    Input,
    /// Reserved inputs `true` and `false`, held at their names' values.
    HiddenInput,
    /// User-visible output.
    Output,
    /// Reserved output `all_stop`; asserting it halts the simulation.
    HiddenOutput,
}

impl PinKind {
    pub fn is_input(self) -> bool {
        matches!(self, PinKind::Input | PinKind::HiddenInput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, PinKind::Output | PinKind::HiddenOutput)
    }

    /// Human form used in connection error messages.
    pub fn describe(self) -> &'static str {
        match self {
            PinKind::Input => "input",
            PinKind::HiddenInput => "hidden input",
            PinKind::Output => "output",
            PinKind::HiddenOutput => "hidden output",
        }
    }
}

/// Which ends of a pin are covered by connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Drive {
    /// Some upstream pin drives this pin.
    pub input: bool,
    /// This pin drives at least one downstream pin.
    pub output: bool,
}

#[derive(Debug, Clone)]
pub struct Pin {
    /// Name, unique within the owning component.
    pub name: String,
    pub kind: PinKind,
    /// Current logical level.
    pub state: bool,
    /// Edge flag; set on transitions, cleared once the edge is acted upon.
    pub state_changed: bool,
    pub drive: Drive,
}

impl Pin {
    pub fn new(name: impl Into<String>, kind: PinKind, state: bool, state_changed: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            state,
            state_changed,
            drive: Drive::default(),
        }
    }
}
