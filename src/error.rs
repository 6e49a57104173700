//! Build and runtime error reporting.
//!
//! Nothing in the build path panics or aborts: every failed operation logs a
//! [`SimError`] and carries on, so one pass over a broken circuit surfaces
//! every problem at once. `Simulation::run` refuses to simulate while the
//! error log is non-empty.

use std::sync::Mutex;

/// Everything that can go wrong while building or running a circuit.
///
/// Display strings are the user-facing log lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("Device {path} tried to connect from pin {origin} but it does not exist")]
    ConnectOriginMissing { path: String, origin: String },

    #[error("Device {path} tried to connect {origin_kind} {origin} to {nature} component {target} but it does not exist")]
    ConnectTargetMissing {
        path: String,
        origin_kind: &'static str,
        origin: String,
        nature: &'static str,
        target: String,
    },

    #[error("Device {path} tried to connect {origin_kind} {origin} to {nature} component {target} pin {pin} but it does not exist")]
    ConnectPinMissing {
        path: String,
        origin_kind: &'static str,
        origin: String,
        nature: &'static str,
        target: String,
        pin: String,
    },

    #[error("Device {path} tried to connect {origin_kind} {origin} to {nature} component {target} {target_kind} pin {pin} but they are not compatible")]
    ConnectIncompatible {
        path: String,
        origin_kind: &'static str,
        origin: String,
        nature: &'static str,
        target: String,
        target_kind: &'static str,
        pin: String,
    },

    #[error("Device {path} tried to connect {origin_kind} {origin} to {nature} component {target} pin {pin} but is already connected to it")]
    ConnectDuplicate {
        path: String,
        origin_kind: &'static str,
        origin: String,
        nature: &'static str,
        target: String,
        pin: String,
    },

    #[error("Device {path} tried to connect {origin_kind} {origin} to {nature} component {target} pin {pin} but it is already driven by another pin")]
    ConnectDriven {
        path: String,
        origin_kind: &'static str,
        origin: String,
        nature: &'static str,
        target: String,
        pin: String,
    },

    #[error("Device {path} tried to connect onward from {origin_kind} {origin} but that pin kind can not be connected from here")]
    ConnectOriginKind {
        path: String,
        origin_kind: &'static str,
        origin: String,
    },

    #[error("{kind} {path} tried to form a connection but the wrong number of connection parameters were provided")]
    ConnectParams { kind: &'static str, path: String },

    #[error("Gate {path} tried to connect to {target} but it does not exist")]
    GateTargetMissing { path: String, target: String },

    #[error("Gate {path} tried to connect to {target} pin {pin} but it does not exist")]
    GatePinMissing {
        path: String,
        target: String,
        pin: String,
    },

    #[error("Gate {path} tried to connect to {target} pin {pin} but is already connected to it")]
    GateDuplicate {
        path: String,
        target: String,
        pin: String,
    },

    #[error("Gate {path} tried to connect to {target} pin {pin} but it is already driven by another pin")]
    GateDriven {
        path: String,
        target: String,
        pin: String,
    },

    #[error("Device {path} tried to {action} child component {child} but it does not exist")]
    ChildMissing {
        path: String,
        action: &'static str,
        child: String,
    },

    #[error("Device {path} tried to {action} pin {pin} of child component {child} but the pin does not exist")]
    ChildPinMissing {
        path: String,
        action: &'static str,
        child: String,
        pin: String,
    },

    #[error("Gate {path} ({kind}) added with only {count} in pins specified")]
    GateArity {
        path: String,
        kind: &'static str,
        count: usize,
    },

    #[error("Device {path} tried to create a bus of hidden pins but this is not possible")]
    BusKind { path: String },

    #[error("Clock {name} can not be created as another clock by this name already exists")]
    ClockDuplicate { name: String },

    #[error("Clock {name} can not be created with an empty toggle pattern")]
    ClockEmptyPattern { name: String },

    #[error("Clock {name} can not be connected onward because it does not exist")]
    ClockMissing { name: String },

    #[error("Clock {name} tried to connect to component {target} but it does not exist")]
    ClockTargetMissing { name: String, target: String },

    #[error("Clock {name} tried to connect to component {target} in pin {pin} but it does not exist")]
    ClockPinMissing {
        name: String,
        target: String,
        pin: String,
    },

    #[error("Clock {name} tried to connect to component {target} pin {pin} but it is not an in pin")]
    ClockPinKind {
        name: String,
        target: String,
        pin: String,
    },

    #[error("Clock {name} tried to connect to component {target} in pin {pin} but it is already driven by another out pin")]
    ClockPinDriven {
        name: String,
        target: String,
        pin: String,
    },

    #[error("Probe {name} can not be added because target component {target} does not exist")]
    ProbeTargetMissing { name: String, target: String },

    #[error("Probe {name} can not be added because target pins {pins} do not all exist")]
    ProbePinsMissing { name: String, pins: String },

    #[error("Probe {name} can not be added because trigger clock {clock} does not exist")]
    ProbeClockMissing { name: String, clock: String },

    #[error("{kind} {path} in pin {pin} is not driven by any Component")]
    InPinUndriven {
        kind: &'static str,
        path: String,
        pin: String,
    },

    #[error("Device {path} in pin {pin} drives no child Components")]
    InPinUndriving { path: String, pin: String },

    #[error("Device {path} out pin {pin} is not driven by any child Component")]
    OutPinUndriven { path: String, pin: String },

    #[error("{kind} {path} out pin {pin} drives no Component")]
    OutPinUndriving {
        kind: &'static str,
        path: String,
        pin: String,
    },

    #[error("Could not stabilise {path} state within {budget} propagation steps")]
    Unstable { path: String, budget: usize },

    #[error("Device {path} ALL_STOP was asserted")]
    AllStop { path: String },

    #[error("Rom {path} tried to open data file {file} but the file could not be opened")]
    RomFile { path: String, file: String },

    #[error("Rom {path} could not parse line {line} of its data file as a memory word: {word}")]
    RomWord {
        path: String,
        line: usize,
        word: String,
    },

    #[error("Device {path} tried to remove child component {child} but it does not exist")]
    RemoveMissing { path: String, child: String },
}

impl SimError {
    /// Re-roots the error's component path when a detached device tree is
    /// attached to a parent.
    pub(crate) fn qualify(&mut self, prefix: &str) {
        use SimError::*;
        let path = match self {
            ConnectOriginMissing { path, .. }
            | ConnectTargetMissing { path, .. }
            | ConnectPinMissing { path, .. }
            | ConnectIncompatible { path, .. }
            | ConnectDuplicate { path, .. }
            | ConnectDriven { path, .. }
            | GateTargetMissing { path, .. }
            | GatePinMissing { path, .. }
            | GateDuplicate { path, .. }
            | GateDriven { path, .. }
            | ConnectOriginKind { path, .. }
            | ConnectParams { path, .. }
            | ChildMissing { path, .. }
            | ChildPinMissing { path, .. }
            | GateArity { path, .. }
            | BusKind { path }
            | InPinUndriven { path, .. }
            | InPinUndriving { path, .. }
            | OutPinUndriven { path, .. }
            | OutPinUndriving { path, .. }
            | Unstable { path, .. }
            | AllStop { path }
            | RomFile { path, .. }
            | RomWord { path, .. }
            | RemoveMissing { path, .. } => path,
            ClockDuplicate { .. }
            | ClockEmptyPattern { .. }
            | ClockMissing { .. }
            | ClockTargetMissing { .. }
            | ClockPinMissing { .. }
            | ClockPinKind { .. }
            | ClockPinDriven { .. }
            | ProbeTargetMissing { .. }
            | ProbePinsMissing { .. }
            | ProbeClockMissing { .. } => return,
        };
        *path = format!("{prefix}:{path}");
    }
}

/// Shared message and error sinks.
///
/// Threaded child solves log from worker threads, so both sinks sit behind a
/// mutex. Locks are held only for the push.
#[derive(Debug, Default)]
pub struct SimLog {
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<SimError>>,
}

impl SimLog {
    pub fn message(&self, message: impl Into<String>) {
        self.messages.lock().expect("message log poisoned").push(message.into());
    }

    pub fn error(&self, error: SimError) {
        tracing::debug!(%error, "logged simulation error");
        self.errors.lock().expect("error log poisoned").push(error);
    }

    pub fn extend_errors(&self, errors: impl IntoIterator<Item = SimError>) {
        self.errors.lock().expect("error log poisoned").extend(errors);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().expect("error log poisoned").is_empty()
    }

    pub fn errors(&self) -> Vec<SimError> {
        self.errors.lock().expect("error log poisoned").clone()
    }

    pub fn error_strings(&self) -> Vec<String> {
        self.errors
            .lock()
            .expect("error log poisoned")
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    pub fn take_messages(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().expect("message log poisoned"))
    }
}
