//! conveyor
//!
//! Binary entry point. All real work lives in the library crate; this
//! file only maps the CLI result onto a process exit code.

use std::process::ExitCode;

fn main() -> ExitCode {
    match conveyor::cli::run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code.clamp(0, u8::MAX as i32) as u8),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
