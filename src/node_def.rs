//! The node_def module renders a normalized execution host as a `slurm.conf`
//! node-definition line, like:
//!
//! ```text
//! NodeName=2117ga001 Sockets=2 CoresPerSocket=32 ThreadsPerCore=2 RealMemory=1031323 TmpDisk=3291536 Gres=gpu:A100:2 Features=A100,brats,cuda11.2,Intel_Xeon,openmpi
//! ```

use snafu::ensure;
use std::fmt;

use crate::exec_host::{AttributeValue, ExecHost};

/// One `slurm.conf` node definition.
#[derive(Debug)]
pub(crate) struct NodeDefinition {
    node_name: String,
    sockets: u64,
    cores_per_socket: u64,
    threads_per_core: u64,
    real_memory: u64,
    tmp_disk: u64,
    gres: Option<String>,
    features: Vec<String>,
}

impl NodeDefinition {
    /// Builds the node definition for one execution host.  Topology, memory,
    /// and tmp space come from the host's load values; GPUs and feature tags
    /// come from its complexes.
    pub(crate) fn from_exec_host(host: &ExecHost) -> Result<Self> {
        let sockets = load_count(host, "m_socket")?;
        let cores = load_count(host, "m_core")?;
        let threads = load_count(host, "m_thread")?;
        ensure!(
            sockets > 0,
            error::ZeroAttributeSnafu {
                host: host.name(),
                attribute: "m_socket",
            }
        );
        ensure!(
            cores > 0,
            error::ZeroAttributeSnafu {
                host: host.name(),
                attribute: "m_core",
            }
        );

        // slurm.conf wants the short name; the scheduler reports names with the domain
        let node_name = match host.name().split_once('.') {
            Some((short, _)) => short.to_string(),
            None => host.name().to_string(),
        };

        Ok(Self {
            node_name,
            sockets,
            cores_per_socket: cores / sockets,
            threads_per_core: threads / cores,
            real_memory: load_size(host, "mem_total")?,
            tmp_disk: load_size(host, "tmptot")?,
            gres: gres(host),
            features: host
                .feature_tags()
                .iter()
                .map(|tag| (*tag).to_string())
                .collect(),
        })
    }
}

impl fmt::Display for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeName={} Sockets={} CoresPerSocket={} ThreadsPerCore={} RealMemory={} TmpDisk={}",
            self.node_name,
            self.sockets,
            self.cores_per_socket,
            self.threads_per_core,
            self.real_memory,
            self.tmp_disk,
        )?;
        if let Some(gres) = &self.gres {
            write!(f, " Gres={}", gres)?;
        }
        if !self.features.is_empty() {
            write!(f, " Features={}", self.features.join(","))?;
        }
        Ok(())
    }
}

/// Builds the GPU resource string, like `gpu:A100:2`, for hosts with GPUs.
fn gres(host: &ExecHost) -> Option<String> {
    match host.complex("gpu") {
        Some(AttributeValue::Count(count)) if *count > 0 => match host.gpu_model() {
            Some(model) => Some(format!("gpu:{}:{}", model, count)),
            None => Some(format!("gpu:{}", count)),
        },
        _ => None,
    }
}

/// Fetches a required count from the host's load values.
fn load_count(host: &ExecHost, attribute: &'static str) -> Result<u64> {
    match host.load_value(attribute) {
        Some(AttributeValue::Count(count)) => Ok(*count),
        Some(_) => error::AttributeKindSnafu {
            host: host.name(),
            attribute,
            expected: "count",
        }
        .fail(),
        None => error::MissingAttributeSnafu {
            host: host.name(),
            attribute,
        }
        .fail(),
    }
}

/// Fetches a required size from the host's load values.
fn load_size(host: &ExecHost, attribute: &'static str) -> Result<u64> {
    match host.load_value(attribute) {
        Some(AttributeValue::Mebibytes(size)) => Ok(*size),
        Some(_) => error::AttributeKindSnafu {
            host: host.name(),
            attribute,
            expected: "size",
        }
        .fail(),
        None => error::MissingAttributeSnafu {
            host: host.name(),
            attribute,
        }
        .fail(),
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display(
            "Host '{}' reports '{}' as something other than a {}",
            host,
            attribute,
            expected
        ))]
        AttributeKind {
            host: String,
            attribute: &'static str,
            expected: &'static str,
        },

        #[snafu(display("Host '{}' reports no '{}' value", host, attribute))]
        MissingAttribute {
            host: String,
            attribute: &'static str,
        },

        #[snafu(display("Host '{}' reports a zero '{}' count", host, attribute))]
        ZeroAttribute {
            host: String,
            attribute: &'static str,
        },
    }
}

pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
