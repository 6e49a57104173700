use assert_matches::assert_matches;

use super::*;

fn and_device() -> Device {
    let mut dev = Device::new("dev", "test", &["a", "b"], &["y"]);
    dev.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    dev.connect("a", "and_0", "input_0");
    dev.connect("b", "and_0", "input_1");
    dev.child_connect("and_0", &["parent", "y"]);
    dev
}

#[test]
fn connect_sets_both_drive_flags() {
    let dev = and_device();
    assert!(dev.pending_errors.is_empty());
    let a = dev.pin_index("a").unwrap();
    assert!(dev.pins[a].drive.output);
    let Part::Gate(gate) = &dev.children[0] else {
        panic!("expected gate child");
    };
    assert!(gate.pins()[0].drive.input);
    assert!(gate.pins()[1].drive.input);
    assert!(gate.pins()[gate.out_index()].drive.output);
    let y = dev.pin_index("y").unwrap();
    assert!(dev.pins[y].drive.input);
}

#[test]
fn rejected_connect_changes_nothing() {
    let mut dev = Device::new("dev", "test", &["a"], &[]);
    dev.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    dev.connect("a", "and_0", "nope");
    assert_matches!(
        dev.pending_errors.as_slice(),
        [SimError::ConnectPinMissing { pin, .. }] if pin == "nope"
    );
    let a = dev.pin_index("a").unwrap();
    assert!(!dev.pins[a].drive.output);
    let Part::Gate(gate) = &dev.children[0] else {
        panic!("expected gate child");
    };
    assert!(gate.pins().iter().all(|p| !p.drive.input));
}

#[test]
fn duplicate_connection_rejected() {
    let mut dev = Device::new("dev", "test", &["a"], &[]);
    dev.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    dev.connect("a", "and_0", "input_0");
    dev.connect("a", "and_0", "input_0");
    assert_matches!(dev.pending_errors.as_slice(), [SimError::ConnectDuplicate { .. }]);
    assert_eq!(dev.ports[dev.pin_index("a").unwrap()].len(), 1);
}

#[test]
fn second_driver_rejected() {
    let mut dev = Device::new("dev", "test", &[], &[]);
    dev.add_gate("src_0", GateKind::Or, &["input_0", "input_1"]);
    dev.add_gate("src_1", GateKind::Or, &["input_0", "input_1"]);
    dev.add_gate("sink", GateKind::And, &["input_0", "input_1"]);
    dev.child_connect("src_0", &["sink", "input_0"]);
    dev.child_connect("src_1", &["sink", "input_0"]);
    assert_matches!(dev.pending_errors.as_slice(), [SimError::GateDriven { .. }]);
    // The first driver survives untouched.
    let Part::Gate(sink) = &dev.children[2] else {
        panic!("expected gate child");
    };
    assert!(sink.pins()[0].drive.input);
    let Part::Gate(src_0) = &dev.children[0] else {
        panic!("expected gate child");
    };
    assert_eq!(src_0.connections.len(), 1);
    let Part::Gate(src_1) = &dev.children[1] else {
        panic!("expected gate child");
    };
    assert!(src_1.connections.is_empty());
}

#[test]
fn hidden_inputs_are_never_connection_targets() {
    let mut dev = Device::new("dev", "test", &["a"], &[]);
    dev.add_component(Device::new("inner", "test", &["x"], &[]));
    dev.connect("a", "inner", "true");
    assert_matches!(
        dev.pending_errors.as_slice(),
        [SimError::ConnectIncompatible { target_kind: "hidden input", .. }]
    );
    let Part::Device(inner) = &dev.children[0] else {
        panic!("expected device child");
    };
    let hidden = inner.pin_index("true").unwrap();
    assert!(!inner.pins[hidden].drive.input);
}

#[test]
fn gate_arity_is_enforced() {
    let mut dev = Device::new("dev", "test", &[], &[]);
    dev.add_gate("and_0", GateKind::And, &["input_0"]);
    assert_matches!(
        dev.pending_errors.as_slice(),
        [SimError::GateArity { kind: "and", count: 1, .. }]
    );
}

#[test]
fn oscillator_hits_propagation_budget_once() {
    let mut dev = Device::new("osc", "oscillator", &[], &[]).with_max_propagations(16);
    dev.add_gate("not_0", GateKind::Not, &[]);
    dev.child_connect("not_0", &["not_0", "input"]);
    let log = SimLog::default();
    dev.stabilise_with(&log);
    let unstable = log
        .errors()
        .iter()
        .filter(|e| matches!(e, SimError::Unstable { .. }))
        .count();
    assert_eq!(unstable, 1);
}

#[test]
fn solve_reaches_fixed_point() {
    let mut dev = and_device();
    dev.stabilise();
    assert!(dev.pending_errors.is_empty());
    let y = dev.pin_index("y").unwrap();
    assert!(!dev.pins[y].state);

    let log = SimLog::default();
    let a = dev.pin_index("a").unwrap();
    let b = dev.pin_index("b").unwrap();
    let _ = dev.receive(a, true, &log);
    let _ = dev.receive(b, true, &log);
    let outcome = dev.solve(&log);
    assert!(dev.pins[y].state);
    assert!(outcome.propagate);
    assert!(log.errors().is_empty());
}

#[test]
fn stabilise_is_idempotent() {
    let mut dev = and_device();
    dev.stabilise();
    let y = dev.pin_index("y").unwrap();
    let settled = dev.pins[y].state;
    dev.stabilise();
    assert!(dev.pending_errors.is_empty());
    assert_eq!(dev.pins[y].state, settled);
}

#[test]
fn remove_child_reconciles_connections() {
    let mut dev = Device::new("dev", "test", &[], &[]);
    dev.add_gate("g_0", GateKind::Or, &["input_0", "input_1"]);
    dev.add_gate("g_1", GateKind::And, &["input_0", "input_1"]);
    dev.add_gate("g_2", GateKind::And, &["input_0", "input_1"]);
    dev.child_connect("g_0", &["g_1", "input_0"]);
    dev.child_connect("g_0", &["g_2", "input_0"]);

    assert!(dev.remove_child("g_1"));
    assert_eq!(dev.children.len(), 2);
    assert_eq!(dev.children[1].name(), "g_2");
    let Part::Gate(g_0) = &dev.children[0] else {
        panic!("expected gate child");
    };
    // The g_1 descriptor is gone and the g_2 descriptor re-points at the
    // shifted slot.
    assert_eq!(g_0.connections.len(), 1);
    assert_eq!(g_0.connections[0].target, Target::Child(1));
    assert!(g_0.pins()[g_0.out_index()].drive.output);
    let Part::Gate(g_2) = &dev.children[1] else {
        panic!("expected gate child");
    };
    assert!(g_2.pins()[0].drive.input);

    assert!(dev.remove_child("g_2"));
    let Part::Gate(g_0) = &dev.children[0] else {
        panic!("expected gate child");
    };
    assert!(g_0.connections.is_empty());
    assert!(!g_0.pins()[g_0.out_index()].drive.output);

    assert!(!dev.remove_child("missing"));
    assert_matches!(dev.pending_errors.as_slice(), [SimError::RemoveMissing { .. }]);
}
