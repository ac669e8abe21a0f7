//! Identity reporter.
//!
//! Joins its process group, prints
//! `Hello from rank <rank> out of <size> processors on <host>`, and leaves.
//!
//! Run with: ferrogroup-run -n 4 -- hello-group

use ferrogroup::{logging, reporter, runtime, Error};
use std::process::ExitCode;

fn main() -> ExitCode {
    logging::init(logging::resolve_level(None));

    let runtime = match runtime::from_env() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "cannot determine process group");
            return ExitCode::from(1);
        }
    };

    let stdout = std::io::stdout();
    match reporter::report(runtime, &mut stdout.lock()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(Error::Output(err)) => {
            tracing::error!(error = %err, "cannot write identity");
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to join process group");
            ExitCode::from(1)
        }
    }
}
