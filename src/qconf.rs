//! The qconf module wraps the Grid Engine `qconf` utility, which answers every
//! question we have about the cluster: `qconf -sel` lists the execution hosts
//! and `qconf -se <hostname>` dumps one host's attributes.

use log::trace;
use snafu::{ensure, ResultExt};
use std::process::Command;

/// Path to the qconf bin
const QCONF_BIN_PATH: &str = "/cbica/software/external/sge/8.1.9-1/bin/lx-amd64/qconf";

/// Returns the names of all execution hosts known to the scheduler, one per
/// line of `qconf -sel` output.
pub(crate) fn execution_hosts() -> Result<Vec<String>> {
    let stdout = command(&["-sel"])?;
    Ok(stdout.split_whitespace().map(String::from).collect())
}

/// Returns the attribute dump for one execution host.
pub(crate) fn host_details(hostname: &str) -> Result<String> {
    command(&["-se", hostname])
}

/// Wrapper around process::Command that adds error checking.
fn command(args: &[&str]) -> Result<String> {
    trace!("calling '{}' with args '{:?}'", QCONF_BIN_PATH, args);
    let output = Command::new(QCONF_BIN_PATH)
        .args(args)
        .output()
        .context(error::ExecutionFailureSnafu {
            args: args.iter().map(|&arg| arg.to_owned()).collect::<Vec<String>>(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    trace!("stdout: {}", stdout);
    trace!("stderr: {}", String::from_utf8_lossy(&output.stderr));

    ensure!(
        output.status.success(),
        error::CommandFailureSnafu {
            args: args.iter().map(|&arg| arg.to_owned()).collect::<Vec<String>>(),
            output,
        }
    );

    Ok(stdout)
}

mod error {
    use snafu::Snafu;
    use std::process::Output;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("qconf {:?} failed - stderr: {}",
                        args, String::from_utf8_lossy(&output.stderr)))]
        CommandFailure { args: Vec<String>, output: Output },

        #[snafu(display("Failed to execute qconf {:?}: {}", args, source))]
        ExecutionFailure {
            args: Vec<String>,
            source: std::io::Error,
        },
    }
}

pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
