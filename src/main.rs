use std::env;
use std::process::exit;

use ripsfix::{cli, logging};

fn main() {
    match logging::init_logging() {
        Ok(log_path) => tracing::debug!("debug log: {}", log_path.display()),
        Err(err) => eprintln!("debug log unavailable: {err}"),
    }

    let args: Vec<String> = env::args().collect();
    exit(cli::run_with_args(&args));
}
