use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;

use logic_sim::{library, ProbeConfig, RunOptions, Simulation, SolverConfig};

#[derive(Parser)]
#[command(about = "Event-driven digital logic simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one of the demo circuits and run it
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Demo circuit to build
    #[arg(value_enum)]
    circuit: Circuit,

    /// Number of simulation ticks
    #[arg(short, long, default_value_t = 16)]
    ticks: u64,

    /// Solve first-level devices on worker threads
    #[arg(long)]
    threaded: bool,

    /// Skip the probe table at the end of the run
    #[arg(long)]
    no_probes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Circuit {
    /// Set/reset latch pulsed by a slow clock
    SrLatch,
    /// JK flip-flop toggling on every clock cycle
    JkFf,
    /// 4-bit synchronous counter
    Counter,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut sim = Simulation::new("demo");
    if args.threaded {
        sim = sim.with_solver_config(SolverConfig {
            use_threads: true,
            threaded_solve_nesting_level: 1,
        });
    }
    match args.circuit {
        Circuit::SrLatch => {
            sim.add_component(library::sr_latch("latch"));
            sim.stabilise();
            sim.add_clock("clock_0", &[true, false, false, false]);
            sim.clock_connect("clock_0", "latch", "s");
            sim.add_probe(
                "latch_out",
                "demo:latch",
                &["out"],
                "clock_0",
                ProbeConfig::default(),
            );
        }
        Circuit::JkFf => {
            sim.add_component(library::jk_ff("test_ff"));
            sim.stabilise();
            sim.add_clock("clock_0", &[false, true]);
            sim.clock_connect("clock_0", "test_ff", "clk");
            sim.add_probe(
                "flip-flop outputs",
                "demo:test_ff",
                &["q", "not_q"],
                "clock_0",
                ProbeConfig::default(),
            );
            sim.child_set("test_ff", "j", true);
            sim.child_set("test_ff", "k", true);
        }
        Circuit::Counter => {
            sim.add_component(library::four_bit_counter("test_counter"));
            sim.stabilise();
            sim.add_clock("clock_0", &[false, true]);
            sim.clock_connect("clock_0", "test_counter", "clk");
            sim.add_probe(
                "counter outputs",
                "demo:test_counter",
                &["q_0", "q_1", "q_2", "q_3"],
                "clock_0",
                ProbeConfig::default(),
            );
            // Start from zero, then let it count.
            sim.child_set("test_counter", "not_c", false);
            sim.child_set("test_counter", "not_c", true);
            sim.child_set("test_counter", "run", true);
        }
    }
    sim.run(RunOptions::ticks(args.ticks).with_print_probes(!args.no_probes));
    Ok(())
}
