// toolsweep-shim/src/main.rs

//! Interceptor entry point
//!
//! Arguments are recorded and passed on untouched apart from argv[0]. Any
//! failure is reported on stderr with a non-zero exit status.

use std::convert::Infallible;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitCode};
use toolsweep_shim::{Invocation, Payload, ShimError, record_invocation, rewrite_argv};

fn run() -> Result<Infallible, ShimError> {
    let exe = env::current_exe().map_err(ShimError::ReadImage)?;
    let image = fs::read(&exe).map_err(ShimError::ReadImage)?;
    let payload = Payload::extract(&image)?.ok_or(ShimError::MissingPayload)?;
    drop(image);

    let args: Vec<OsString> = env::args_os().collect();
    let directory = env::current_dir().unwrap_or_default();
    let invocation = Invocation::now(&payload.tool, directory, args);
    record_invocation(&payload.audit_dir, &invocation)?;

    let argv = rewrite_argv(&invocation.argv, &payload.destination);
    // exec only returns on failure
    let source = Command::new(&payload.destination)
        .arg0(&argv[0])
        .args(&argv[1..])
        .exec();

    Err(ShimError::Exec {
        path: payload.destination,
        source,
    })
}

fn main() -> ExitCode {
    match run() {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("toolsweep-shim: {}", e);
            match e {
                ShimError::Exec { .. } => ExitCode::from(127),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
