// soil_runner: command-line driver for the soil simulator.
//
// Builds a `SoilEvolution` from defaults or a JSON config file, generates a
// parabolic dig trajectory (fixed or randomized), runs it, and optionally
// writes one set of CSV files per applied step plus a JSON run summary. This
// is the only crate in the workspace that touches the filesystem or
// installs a logger.
//
// Module overview:
// - `cli.rs`:    `Args` (clap derive) and how flags override the config.
// - `driver.rs`: Trajectory construction and the run itself.
// - `output.rs`: `CsvSink`, the step observer that writes the CSV files.
//
// The binary (`main.rs`) only parses arguments, sets up `env_logger` and
// reports the outcome.

pub mod cli;
pub mod driver;
pub mod output;

pub use cli::Args;
pub use driver::execute;
