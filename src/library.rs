//! Pre-built composite devices.
//!
//! Each builder returns a fully wired, stabilised [`Device`] ready to be
//! added to a parent. They double as worked examples of the builder API:
//! `connect` fans a device input into children, `child_connect` wires child
//! outputs onward, and unused outputs are marked so the end-of-build report
//! stays quiet.

use crate::device::Device;
use crate::gate::GateKind;

/// Set/reset latch built from an OR, an AND and an inverter: the output
/// feeds back through the OR, `s` raises it, `r` gates it off.
pub fn sr_latch(name: &str) -> Device {
    let mut latch = Device::new(name, "sr_latch", &["s", "r"], &["out"]);
    latch.add_gate("or_0", GateKind::Or, &["input_0", "input_1"]);
    latch.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    latch.add_gate("not_0", GateKind::Not, &[]);

    latch.child_connect("or_0", &["and_0", "input_0"]);
    latch.child_connect("not_0", &["and_0", "input_1"]);
    latch.child_connect("and_0", &["or_0", "input_0"]);

    latch.connect("s", "or_0", "input_1");
    latch.connect("r", "not_0", "input");
    latch.child_connect("and_0", &["parent", "out"]);

    latch.stabilise();
    latch
}

/// Master–slave JK flip-flop: eight NANDs and one inverter. `q` toggles
/// once per full clock cycle while `j` and `k` are both high.
pub fn jk_ff(name: &str) -> Device {
    let mut ff = Device::new(name, "jk_ff", &["j", "k", "clk"], &["q", "not_q"]);
    ff.add_gate("nand_1", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_2", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_3", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_4", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_5", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_6", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_7", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_8", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("not_1", GateKind::Not, &[]);

    ff.child_connect("not_1", &["nand_5", "input_1"]);
    ff.child_connect("not_1", &["nand_6", "input_1"]);

    ff.child_connect("nand_1", &["nand_3", "input_0"]);
    ff.child_connect("nand_2", &["nand_4", "input_0"]);
    ff.child_connect("nand_3", &["nand_4", "input_1"]);
    ff.child_connect("nand_4", &["nand_3", "input_1"]);

    ff.child_connect("nand_3", &["nand_5", "input_0"]);
    ff.child_connect("nand_4", &["nand_6", "input_0"]);

    ff.child_connect("nand_5", &["nand_7", "input_0"]);
    ff.child_connect("nand_6", &["nand_8", "input_0"]);
    ff.child_connect("nand_7", &["nand_8", "input_1"]);
    ff.child_connect("nand_8", &["nand_7", "input_1"]);

    ff.child_connect("nand_7", &["nand_2", "input_1"]);
    ff.child_connect("nand_8", &["nand_1", "input_1"]);

    ff.child_connect("nand_7", &["parent", "q"]);
    ff.child_connect("nand_8", &["parent", "not_q"]);

    ff.connect("j", "nand_1", "input_0");
    ff.connect("k", "nand_2", "input_0");
    ff.connect("clk", "nand_1", "input_2");
    ff.connect("clk", "nand_2", "input_2");
    ff.connect("clk", "not_1", "input");

    ff.stabilise();
    ff
}

/// JK flip-flop with active-low asynchronous preset (`not_p`) and clear
/// (`not_c`). Same master–slave core as [`jk_ff`], widened to three-input
/// NANDs where the asynchronous inputs reach in.
pub fn jk_ff_aspc(name: &str) -> Device {
    let mut ff = Device::new(
        name,
        "jk_ff_aspc",
        &["j", "k", "not_p", "not_c", "clk"],
        &["q", "not_q"],
    );
    ff.add_gate("nand_1", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_2", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_3", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_4", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_5", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_6", GateKind::Nand, &["input_0", "input_1"]);
    ff.add_gate("nand_7", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("nand_8", GateKind::Nand, &["input_0", "input_1", "input_2"]);
    ff.add_gate("not_1", GateKind::Not, &[]);

    ff.child_connect("not_1", &["nand_5", "input_1"]);
    ff.child_connect("not_1", &["nand_6", "input_1"]);

    ff.child_connect("nand_1", &["nand_3", "input_0"]);
    ff.child_connect("nand_2", &["nand_4", "input_0"]);
    ff.child_connect("nand_3", &["nand_4", "input_1"]);
    ff.child_connect("nand_4", &["nand_3", "input_1"]);

    ff.child_connect("nand_3", &["nand_5", "input_0"]);
    ff.child_connect("nand_4", &["nand_6", "input_0"]);

    ff.child_connect("nand_5", &["nand_7", "input_0"]);
    ff.child_connect("nand_6", &["nand_8", "input_0"]);
    ff.child_connect("nand_7", &["nand_8", "input_1"]);
    ff.child_connect("nand_8", &["nand_7", "input_1"]);

    ff.child_connect("nand_7", &["nand_2", "input_1"]);
    ff.child_connect("nand_8", &["nand_1", "input_1"]);

    ff.child_connect("nand_7", &["parent", "q"]);
    ff.child_connect("nand_8", &["parent", "not_q"]);

    ff.connect("j", "nand_1", "input_0");
    ff.connect("k", "nand_2", "input_0");
    ff.connect("not_p", "nand_3", "input_2");
    ff.connect("not_p", "nand_7", "input_2");
    ff.connect("not_c", "nand_4", "input_2");
    ff.connect("not_c", "nand_8", "input_2");
    ff.connect("clk", "nand_1", "input_2");
    ff.connect("clk", "nand_2", "input_2");
    ff.connect("clk", "not_1", "input");

    ff.stabilise();
    ff
}

/// Four clearable JK flip-flops with cascading ANDs. Inputs `run`, `clk`
/// and the active-low `not_c` clear; outputs `q_0`..`q_3`. Preset lines are
/// tied to the hidden `true` pin. Pull `not_c` low once after build to
/// start counting from zero.
pub fn four_bit_counter(name: &str) -> Device {
    let mut counter = Device::new(
        name,
        "4_bit_counter",
        &["run", "clk", "not_c"],
        &["q_0", "q_1", "q_2", "q_3"],
    );
    counter.add_component(jk_ff_aspc("jk_ff_0"));
    counter.add_component(jk_ff_aspc("jk_ff_1"));
    counter.add_component(jk_ff_aspc("jk_ff_2"));
    counter.add_component(jk_ff_aspc("jk_ff_3"));
    counter.add_gate("and_0", GateKind::And, &["input_0", "input_1"]);
    counter.add_gate("and_1", GateKind::And, &["input_0", "input_1"]);
    counter.add_gate("and_2", GateKind::And, &["input_0", "input_1"]);

    counter.connect("run", "jk_ff_0", "j");
    counter.connect("run", "jk_ff_0", "k");
    counter.connect("run", "and_0", "input_0");
    for ff in ["jk_ff_0", "jk_ff_1", "jk_ff_2", "jk_ff_3"] {
        counter.connect("clk", ff, "clk");
        counter.connect("not_c", ff, "not_c");
        counter.connect("true", ff, "not_p");
        counter.child_mark_output_unused(ff, "not_q");
    }

    // Bit 0 just has the flip-flop connections.
    counter.child_connect("jk_ff_0", &["q", "parent", "q_0"]);
    counter.child_connect("jk_ff_0", &["q", "and_0", "input_1"]);

    // Bit 1.
    counter.child_connect("and_0", &["jk_ff_1", "j"]);
    counter.child_connect("and_0", &["jk_ff_1", "k"]);
    counter.child_connect("and_0", &["and_1", "input_0"]);
    counter.child_connect("jk_ff_1", &["q", "parent", "q_1"]);
    counter.child_connect("jk_ff_1", &["q", "and_1", "input_1"]);

    // Bit 2.
    counter.child_connect("and_1", &["jk_ff_2", "j"]);
    counter.child_connect("and_1", &["jk_ff_2", "k"]);
    counter.child_connect("and_1", &["and_2", "input_0"]);
    counter.child_connect("jk_ff_2", &["q", "parent", "q_2"]);
    counter.child_connect("jk_ff_2", &["q", "and_2", "input_1"]);

    // Bit 3.
    counter.child_connect("and_2", &["jk_ff_3", "j"]);
    counter.child_connect("and_2", &["jk_ff_3", "k"]);
    counter.child_connect("jk_ff_3", &["q", "parent", "q_3"]);

    counter.stabilise();
    counter
}
