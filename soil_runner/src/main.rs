// CLI entry point for the soil simulator.
//
// Digs one bucket trajectory through a soil grid and prints a summary. See
// `cli.rs` for the options and `driver.rs` for what a run does.
//
// Usage:
//   soil-runner [OPTIONS]
//     --config <FILE>        JSON simulator configuration (default: built-in)
//     --output <DIR>         Write per-step CSV files and summary.json
//     --random-trajectory    Randomize the dig's start and deepest points
//     --no-fixed-seed        Seed from the clock
//     --check                Volume and consistency checks after every step
//     --log-steps            One log line per step
//     --verbose              Debug logging (RUST_LOG still takes precedence)

use clap::Parser;
use soil_runner::{Args, execute};

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .init();

    match execute(&args) {
        Ok(summary) => {
            println!(
                "{} steps ({} skipped): removed {} ticks, {} carried, {} pushed aside, {} released",
                summary.steps,
                summary.skipped,
                summary.removed,
                summary.attached,
                summary.displaced,
                summary.released
            );
            println!(
                "soil volume {:.6} m³ -> {:.6} m³, {} diagnostics",
                summary.initial_volume, summary.final_volume, summary.warnings
            );
            if summary.stopped_early {
                println!("run stopped early (output error)");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Run failed: {e}");
            std::process::exit(1);
        }
    }
}
