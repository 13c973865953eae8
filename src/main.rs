//! livequery CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. A failed command
//! prints its error to stderr and exits with the error's status.

use livequery::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(e.exit_status());
    }
}
