//! Process-group launcher.
//!
//! ```sh
//! ferrogroup-run -n 3 -- hello-group
//! ferrogroup-run -n 3 --host-name node01 --log-level debug -- ./my-member --flag
//! ```

use clap::Parser;
use ferrogroup::{launch, logging, LaunchConfig};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ferrogroup-run")]
#[command(about = "Start N copies of a program as one process group")]
#[command(version)]
struct Cli {
    /// Number of processes in the group.
    #[arg(short = 'n', long = "np", value_name = "N", default_value_t = 1,
          value_parser = clap::value_parser!(i32).range(1..))]
    np: i32,

    /// Address the rendezvous coordinator listens on.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Milliseconds the members get to join before the group is abandoned.
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    join_timeout_ms: u64,

    /// Host label every member reports instead of the OS host name.
    #[arg(long)]
    host_name: Option<String>,

    /// Log level for the launcher and its members (error, warn, info, debug, trace).
    #[arg(long, env = "FERROGROUP_LOG")]
    log_level: Option<String>,

    /// Program to run, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(logging::resolve_level(cli.log_level.as_deref()));

    let mut args = cli.command.into_iter();
    let Some(program) = args.next() else {
        tracing::error!("no program given");
        return ExitCode::from(1);
    };

    let config = LaunchConfig {
        size: cli.np,
        program,
        args: args.collect(),
        bind: cli.bind,
        join_timeout: Duration::from_millis(cli.join_timeout_ms),
        host_name: cli.host_name,
        log_level: cli.log_level,
    };

    match launch(&config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            tracing::error!(error = %err, "launch failed");
            ExitCode::from(1)
        }
    }
}
