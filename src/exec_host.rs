//! The exec_host module parses the attribute dump the scheduler prints for a single
//! execution host and normalizes the attributes that matter for a node definition.
//!
//! A dump is a sequence of fields, one per line, with long values wrapped onto
//! backslash-continued lines:
//!
//! ```text
//! hostname              2117ga001.bicic.local
//! load_scaling          NONE
//! complex_values        A100=TRUE,brats=TRUE,cuda11.2=TRUE,gpu=2,gpu_A100=TRUE, \
//!                       h_vmem=1000G,Intel_Xeon=TRUE,openmpi=TRUE,slots=128, \
//!                       tmpfree=3075933436k
//! load_values           arch=lx-amd64,num_proc=128,mem_total=1031323.867188M, \
//!                       m_socket=2,m_core=64,m_thread=128,load_avg=3.640000, \
//!                       tmpfree=3075933320k,tmptot=3370532884k,tmpused=294599564k
//! processors            128
//! ```
//!
//! Two fields carry everything we need: `complex_values` holds the resources an
//! administrator assigned to the host, like GPU counts and feature tags, and
//! `load_values` holds what the host itself reports about its hardware, like
//! topology counts and memory sizes.  Both are comma-separated lists of
//! `name=value` entries.

use indexmap::IndexMap;
use log::trace;
use snafu::{OptionExt, ResultExt};

/// Fields we don't read; they describe scheduling policy, not capacity.
const SKIPPED_FIELDS: &[&str] = &[
    "hostname",
    "load_scaling",
    "processors",
    "user_lists",
    "xuser_lists",
    "projects",
    "xprojects",
    "usage_scaling",
    "report_variables",
];

/// Attributes holding a plain count.
const COUNT_ATTRIBUTES: &[&str] = &["m_socket", "m_core", "m_thread", "num_proc", "gpu", "slots"];

/// Attributes holding a size, with an optional k/m/g/t multiplier.
const SIZE_ATTRIBUTES: &[&str] = &[
    "mem_total",
    "mem_free",
    "mem_used",
    "swap_total",
    "swap_free",
    "swap_used",
    "virtual_total",
    "virtual_free",
    "virtual_used",
    "tmptot",
    "tmpfree",
    "tmpused",
    "h_vmem",
];

const BYTES_PER_MEBIBYTE: f64 = 1024.0 * 1024.0;

/// A normalized attribute value.  Attributes whose names appear in neither
/// table above and that aren't TRUE/FALSE (the load averages, the `m_topology`
/// mask, and so on) carry nothing a node definition needs, so they are dropped
/// during parsing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) enum AttributeValue {
    /// A TRUE/FALSE complex; these act as feature tags.
    Flag(bool),
    /// A count, like sockets or GPUs.
    Count(u64),
    /// A size, reduced to whole mebibytes.
    Mebibytes(u64),
}

/// The normalized attributes of one execution host.
#[derive(Debug)]
pub(crate) struct ExecHost {
    name: String,
    complexes: IndexMap<String, AttributeValue>,
    load_values: IndexMap<String, AttributeValue>,
}

impl ExecHost {
    /// Parses an attribute dump into a normalized host description.
    pub(crate) fn from_details<S>(name: S, details: &str) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let fields = parse_fields(details)?;

        let mut complexes = IndexMap::new();
        let mut load_values = IndexMap::new();
        for (field, value) in fields {
            match field.as_str() {
                "complex_values" => complexes = parse_attributes(&value)?,
                "load_values" => load_values = parse_attributes(&value)?,
                _ => trace!("ignoring field '{}'", field),
            }
        }

        Ok(Self {
            name: name.as_ref().to_string(),
            complexes,
            load_values,
        })
    }

    /// The host's name as the scheduler reports it, domain included.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an administrator-assigned complex.
    pub(crate) fn complex(&self, attribute: &str) -> Option<&AttributeValue> {
        self.complexes.get(attribute)
    }

    /// Looks up a value the host reports about itself.
    pub(crate) fn load_value(&self, attribute: &str) -> Option<&AttributeValue> {
        self.load_values.get(attribute)
    }

    /// Returns the host's feature tags: complexes set to TRUE, in the order the
    /// scheduler printed them.  `gpu_`-prefixed tags mark the GPU model and are
    /// reported through the GPU resource string instead.
    pub(crate) fn feature_tags(&self) -> Vec<&str> {
        self.complexes
            .iter()
            .filter(|(name, value)| {
                matches!(value, AttributeValue::Flag(true)) && !name.starts_with("gpu_")
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Returns the GPU model, taken from the first `gpu_<MODEL>=TRUE` complex.
    pub(crate) fn gpu_model(&self) -> Option<&str> {
        self.complexes
            .iter()
            .find_map(|(name, value)| match value {
                AttributeValue::Flag(true) => name.strip_prefix("gpu_"),
                _ => None,
            })
    }
}

/// Splits a dump into its fields, rejoining backslash-wrapped lines and skipping
/// the fields in `SKIPPED_FIELDS`.
///
/// The scheduler wraps long values after a comma, so continuation pieces join
/// back without a separator.
fn parse_fields(details: &str) -> Result<IndexMap<String, String>> {
    let mut fields: IndexMap<String, String> = IndexMap::new();
    let mut current_field: Option<String> = None;

    for line in details.lines() {
        if SKIPPED_FIELDS.iter().any(|field| line.starts_with(field)) {
            continue;
        }

        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        tokens.retain(|&token| token != "\\");

        match tokens.as_slice() {
            [] => continue,
            [field, value] => {
                fields.insert((*field).to_string(), (*value).to_string());
                current_field = Some((*field).to_string());
            }
            [continuation, ..] => {
                let field = current_field
                    .as_deref()
                    .context(error::OrphanContinuationSnafu { line })?;
                // current_field is only ever set to a key already in the map
                if let Some(value) = fields.get_mut(field) {
                    value.push_str(continuation);
                }
            }
        }
    }

    Ok(fields)
}

/// Expands a field's value, a comma-separated list of `name=value` entries, into
/// normalized attributes.  The scheduler prints `NONE` for a field with no
/// entries.
fn parse_attributes(value: &str) -> Result<IndexMap<String, AttributeValue>> {
    let mut attributes = IndexMap::new();
    if value == "NONE" {
        return Ok(attributes);
    }

    for entry in value.split(',') {
        let (name, raw) = entry
            .split_once('=')
            .context(error::AttributeSyntaxSnafu { entry })?;
        match attribute_value(name, raw)? {
            Some(attribute) => {
                trace!("attribute '{}' = {:?}", name, attribute);
                attributes.insert(name.to_string(), attribute);
            }
            None => trace!("dropping attribute '{}' = '{}'", name, raw),
        }
    }

    Ok(attributes)
}

/// Coerces one attribute to its normalized value, or None for the names a node
/// definition never uses.
fn attribute_value(name: &str, raw: &str) -> Result<Option<AttributeValue>> {
    if raw == "TRUE" {
        return Ok(Some(AttributeValue::Flag(true)));
    }
    if raw == "FALSE" {
        return Ok(Some(AttributeValue::Flag(false)));
    }
    if COUNT_ATTRIBUTES.contains(&name) {
        let count = raw.parse().context(error::CountValueSnafu {
            attribute: name,
            value: raw,
        })?;
        return Ok(Some(AttributeValue::Count(count)));
    }
    if SIZE_ATTRIBUTES.contains(&name) {
        return Ok(Some(AttributeValue::Mebibytes(parse_size(raw)?)));
    }
    Ok(None)
}

/// Converts a size with an optional k/m/g/t multiplier (case-insensitive,
/// 1024-based) into whole mebibytes.  A bare number is taken as bytes.  The
/// scheduler prints fractional sizes like `1031323.867188M`; anything below a
/// whole mebibyte is truncated.
fn parse_size(size: &str) -> Result<u64> {
    let (number, multiplier) = match size.char_indices().last() {
        Some((index, suffix)) if suffix.is_ascii_alphabetic() => {
            let bytes = match suffix.to_ascii_lowercase() {
                'k' => 1024.0,
                'm' => 1024.0 * 1024.0,
                'g' => 1024.0 * 1024.0 * 1024.0,
                't' => 1024.0 * 1024.0 * 1024.0 * 1024.0,
                _ => return error::SizeSuffixSnafu { size, suffix }.fail(),
            };
            (&size[..index], bytes)
        }
        _ => (size, 1.0),
    };

    let value: f64 = number.parse().context(error::SizeValueSnafu { size })?;
    Ok((value * multiplier / BYTES_PER_MEBIBYTE) as u64)
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Attribute entry '{}' is not name=value", entry))]
        AttributeSyntax { entry: String },

        #[snafu(display("Attribute '{}' has non-numeric count '{}': {}", attribute, value, source))]
        CountValue {
            attribute: String,
            value: String,
            source: std::num::ParseIntError,
        },

        #[snafu(display("Continuation line '{}' appears before any field", line))]
        OrphanContinuation { line: String },

        #[snafu(display("Unknown size multiplier '{}' in '{}'", suffix, size))]
        SizeSuffix { size: String, suffix: char },

        #[snafu(display("Failed to parse size '{}': {}", size, source))]
        SizeValue {
            size: String,
            source: std::num::ParseFloatError,
        },
    }
}

pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;

    const GPU_HOST_DETAILS: &str = r"hostname              2117ga001.bicic.local
load_scaling          NONE
complex_values        A100=TRUE,brats=TRUE,cuda11.2=TRUE,gpu=2,gpu_A100=TRUE, \
                      h_vmem=1000G,Intel_Xeon=TRUE,openmpi=TRUE,slots=128, \
                      tmpfree=3075933436k
load_values           arch=lx-amd64,num_proc=128,mem_total=1031323.867188M, \
                      swap_total=4095.996094M,virtual_total=1035419.863281M, \
                      m_topology=SCTTCTTSCTTCTT,m_socket=2,m_core=64, \
                      m_thread=128,load_avg=3.640000,load_short=3.810000, \
                      mem_free=1001792.296875M,swap_free=4095.996094M, \
                      virtual_free=1005888.292969M,mem_used=29531.570312M, \
                      swap_used=0.000000M,virtual_used=29531.570312M, \
                      cpu=3.000000,np_load_avg=0.028438, \
                      tmpfree=3075933320k,tmptot=3370532884k,tmpused=294599564k
processors            128
user_lists            NONE
xuser_lists           NONE
projects              NONE
xprojects             NONE
usage_scaling         NONE
report_variables      NONE
";

    #[test]
    fn joins_wrapped_fields() {
        let fields = parse_fields(GPU_HOST_DETAILS).unwrap();
        assert_eq!(
            fields.get("complex_values").unwrap(),
            "A100=TRUE,brats=TRUE,cuda11.2=TRUE,gpu=2,gpu_A100=TRUE,\
             h_vmem=1000G,Intel_Xeon=TRUE,openmpi=TRUE,slots=128,\
             tmpfree=3075933436k"
        );
    }

    #[test]
    fn skips_policy_fields() {
        let fields = parse_fields(GPU_HOST_DETAILS).unwrap();
        assert!(fields.get("hostname").is_none());
        assert!(fields.get("processors").is_none());
        assert!(fields.get("user_lists").is_none());
        assert!(fields.get("report_variables").is_none());
    }

    #[test]
    fn fails_on_orphan_continuation() {
        let details = "                      h_vmem=1000G,slots=128\n";
        assert!(parse_fields(details).is_err());
    }

    #[test]
    fn expands_empty_field() {
        assert!(parse_attributes("NONE").unwrap().is_empty());
    }

    #[test]
    fn fails_on_bare_attribute() {
        assert!(parse_attributes("gpu=2,openmpi").is_err());
    }

    #[test]
    fn coerces_known_attributes() {
        assert_eq!(
            attribute_value("A100", "TRUE").unwrap(),
            Some(AttributeValue::Flag(true))
        );
        assert_eq!(
            attribute_value("fastscratch", "FALSE").unwrap(),
            Some(AttributeValue::Flag(false))
        );
        assert_eq!(
            attribute_value("m_socket", "2").unwrap(),
            Some(AttributeValue::Count(2))
        );
        assert_eq!(
            attribute_value("gpu", "4").unwrap(),
            Some(AttributeValue::Count(4))
        );
        assert_eq!(
            attribute_value("mem_total", "1031323.867188M").unwrap(),
            Some(AttributeValue::Mebibytes(1031323))
        );
        assert_eq!(
            attribute_value("h_vmem", "1000G").unwrap(),
            Some(AttributeValue::Mebibytes(1024000))
        );
    }

    #[test]
    fn drops_unrecognized_attributes() {
        assert_eq!(attribute_value("arch", "lx-amd64").unwrap(), None);
        assert_eq!(attribute_value("load_avg", "3.640000").unwrap(), None);
        assert_eq!(attribute_value("m_topology", "SCTTCTTSCTTCTT").unwrap(), None);
        assert_eq!(attribute_value("np_load_avg", "0.028438").unwrap(), None);
    }

    #[test]
    fn fails_on_bad_count() {
        assert!(attribute_value("m_socket", "two").is_err());
        assert!(attribute_value("gpu", "2.5").is_err());
    }

    #[test]
    fn converts_size_multipliers() {
        assert_eq!(parse_size("3370532884k").unwrap(), 3291536);
        assert_eq!(parse_size("1031323.867188M").unwrap(), 1031323);
        assert_eq!(parse_size("1000G").unwrap(), 1024000);
        assert_eq!(parse_size("1T").unwrap(), 1048576);
        assert_eq!(parse_size("2097152").unwrap(), 2);
    }

    #[test]
    fn size_multipliers_ignore_case() {
        assert_eq!(parse_size("1000g").unwrap(), parse_size("1000G").unwrap());
        assert_eq!(
            parse_size("3370532884K").unwrap(),
            parse_size("3370532884k").unwrap()
        );
    }

    #[test]
    fn fails_on_bad_size() {
        assert!(parse_size("").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("12.5.6M").is_err());
    }

    #[test]
    fn parses_gpu_host() {
        let host = ExecHost::from_details("2117ga001.bicic.local", GPU_HOST_DETAILS).unwrap();
        assert_eq!(host.name(), "2117ga001.bicic.local");
        assert_eq!(host.complex("gpu"), Some(&AttributeValue::Count(2)));
        assert_eq!(host.complex("slots"), Some(&AttributeValue::Count(128)));
        assert_eq!(
            host.complex("h_vmem"),
            Some(&AttributeValue::Mebibytes(1024000))
        );
        assert_eq!(
            host.load_value("mem_total"),
            Some(&AttributeValue::Mebibytes(1031323))
        );
        assert_eq!(
            host.load_value("tmptot"),
            Some(&AttributeValue::Mebibytes(3291536))
        );
        assert_eq!(host.load_value("m_socket"), Some(&AttributeValue::Count(2)));
        assert_eq!(host.load_value("arch"), None);
    }

    #[test]
    fn reports_feature_tags_in_order() {
        let host = ExecHost::from_details("2117ga001.bicic.local", GPU_HOST_DETAILS).unwrap();
        assert_eq!(
            host.feature_tags(),
            vec!["A100", "brats", "cuda11.2", "Intel_Xeon", "openmpi"]
        );
    }

    #[test]
    fn feature_tags_omit_false_flags() {
        let host = ExecHost::from_details(
            "host",
            "complex_values        AVX=TRUE,fastscratch=FALSE,SGX=TRUE\n",
        )
        .unwrap();
        assert_eq!(host.feature_tags(), vec!["AVX", "SGX"]);
    }

    #[test]
    fn reports_gpu_model() {
        let host = ExecHost::from_details("2117ga001.bicic.local", GPU_HOST_DETAILS).unwrap();
        assert_eq!(host.gpu_model(), Some("A100"));
    }

    #[test]
    fn no_gpu_model_without_marker() {
        let host = ExecHost::from_details(
            "host",
            "complex_values        SGX=TRUE,AVX=TRUE,gpu=4\n",
        )
        .unwrap();
        assert_eq!(host.gpu_model(), None);
    }
}
