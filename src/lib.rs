//! Event-driven simulator for synchronous digital logic.
//!
//! Circuits are built bottom-up from primitive gates and composite
//! [`Device`]s, attached to a top-level [`Simulation`], stabilised, and then
//! run tick by tick. Within each tick every [`Clock`](crate::clock) advances
//! once and the device tree is solved to a fixed point before
//! [`Probe`](crate::probe)s sample.
//!
//! ```no_run
//! use logic_sim::{library, ProbeConfig, RunOptions, Simulation};
//!
//! let mut sim = Simulation::new("demo");
//! sim.add_component(library::jk_ff("ff"));
//! sim.stabilise();
//! sim.add_clock("clock_0", &[false, true]);
//! sim.clock_connect("clock_0", "ff", "clk");
//! sim.add_probe("ff_q", "demo:ff", &["q", "not_q"], "clock_0", ProbeConfig::default());
//! sim.child_set("ff", "j", true);
//! sim.child_set("ff", "k", true);
//! sim.run(RunOptions::ticks(8).with_print_probes(true));
//! ```

pub mod clock;
pub mod device;
pub mod error;
pub mod gate;
pub mod library;
pub mod pin;
pub mod probe;
pub mod simulation;
pub mod special;

pub use device::{Device, SolverConfig, DEFAULT_MAX_PROPAGATIONS};
pub use error::{SimError, SimLog};
pub use gate::GateKind;
pub use pin::{Drive, Pin, PinKind};
pub use probe::ProbeConfig;
pub use simulation::{RunOptions, Simulation};
pub use special::{PinAccess, Rom, SpecialDevice};
