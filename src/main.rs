/*!
# Introduction

griddog generates the node definitions a Slurm cluster configuration needs from
a Grid Engine cluster's execution hosts.  It asks `qconf` for the list of
execution hosts, fetches each host's attribute dump, normalizes the attributes
that matter (topology, memory, tmp space, GPUs, feature tags), and prints one
`slurm.conf` node-definition line per compute host on stdout:

```text
NodeName=2117ga001 Sockets=2 CoresPerSocket=32 ThreadsPerCore=2 RealMemory=1031323 TmpDisk=3291536 Gres=gpu:A100:2 Features=A100,brats,cuda11.2,Intel_Xeon,openmpi
```

Log messages go to stderr so the node lines can be redirected on their own; pass
`--debug` to trace the parsing of each host's dump.

(The name "griddog" comes from the fact that it herds Grid Engine hosts into a
new pen.)
*/

#![deny(rust_2018_idioms)]

use argh::FromArgs;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::process;

use crate::exec_host::ExecHost;
use crate::node_def::NodeDefinition;

mod exec_host;
mod node_def;
mod qconf;

lazy_static! {
    /// Login nodes show up in the execution host list but take no batch work.
    static ref LOGIN_HOST: Regex = Regex::new(r"^cubic-login").unwrap();
}

/// Non-compute hosts that don't match the login-node pattern.
const EXCLUDED_HOSTS: &[&str] = &["cubic-sattertt1.bicic.local"];

/// Stores arguments
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    /// trace the parsing of each host's attribute dump
    #[argh(switch, short = 'd')]
    debug: bool,
}

/// Drops the hosts that never run batch jobs; everything else passes through
/// in the order the scheduler listed it.
fn compute_hosts(mut hosts: Vec<String>) -> Vec<String> {
    hosts.retain(|host| !LOGIN_HOST.is_match(host) && !EXCLUDED_HOSTS.contains(&host.as_str()));
    hosts
}

fn run() -> Result<()> {
    let args: Args = argh::from_env();
    let log_level = if args.debug {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };

    // TerminalMode::Stderr will send all logs to stderr, as the caller only
    // expects node-definition lines on stdout.
    TermLogger::init(
        log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    let all_hosts = qconf::execution_hosts().context(error::ListHostsSnafu)?;
    debug!("the scheduler reports {} execution hosts", all_hosts.len());

    let hosts = compute_hosts(all_hosts);
    debug!("{} compute hosts left after filtering", hosts.len());

    for hostname in hosts {
        let details = qconf::host_details(&hostname).context(error::HostDetailsSnafu {
            hostname: &hostname,
        })?;
        let host = ExecHost::from_details(&hostname, &details).context(error::ParseDetailsSnafu {
            hostname: &hostname,
        })?;
        let node = NodeDefinition::from_exec_host(&host).context(error::NodeDefinitionSnafu {
            hostname: &hostname,
        })?;
        println!("{}", node);
    }

    Ok(())
}

// Returning a Result from main makes it print a Debug representation of the error, but with Snafu
// we have nice Display representations of the error, so we wrap "main" (run) and print any error.
// https://github.com/shepmaster/snafu/issues/110
fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("Failed to fetch attributes of '{}': {}", hostname, source))]
        HostDetails {
            hostname: String,
            source: crate::qconf::Error,
        },

        #[snafu(display("Failed to list execution hosts: {}", source))]
        ListHosts { source: crate::qconf::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Failed to build the node definition for '{}': {}", hostname, source))]
        NodeDefinition {
            hostname: String,
            source: crate::node_def::Error,
        },

        #[snafu(display("Failed to parse attributes of '{}': {}", hostname, source))]
        ParseDetails {
            hostname: String,
            source: crate::exec_host::Error,
        },
    }
}

type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drops_login_and_excluded_hosts() {
        let all_hosts = vec![
            "2115ga001.bicic.local".to_string(),
            "cubic-login1.bicic.local".to_string(),
            "cubic-login2.uphs.upenn.edu".to_string(),
            "compute-fed1.bicic.local".to_string(),
            "cubic-sattertt1.bicic.local".to_string(),
            "2117ga001.bicic.local".to_string(),
        ];
        assert_eq!(
            compute_hosts(all_hosts),
            vec![
                "2115ga001.bicic.local".to_string(),
                "compute-fed1.bicic.local".to_string(),
                "2117ga001.bicic.local".to_string(),
            ]
        );
    }

    #[test]
    fn keeps_compute_hosts_untouched() {
        let all_hosts = vec![
            "2115ga001.bicic.local".to_string(),
            "2116ha014.bicic.local".to_string(),
        ];
        assert_eq!(compute_hosts(all_hosts.clone()), all_hosts);
    }
}
