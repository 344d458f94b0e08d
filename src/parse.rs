//! Parsers for the text and JSON emitted by remote commands.
//!
//! Every parser is strict: a malformed row or a token that is not a
//! number is a [`ParseError`], never a silently skipped value.

use serde::Deserialize;

use crate::error::ParseError;
use crate::types::{LoadSample, NodeDescriptor, RegistryEntry, RunningService};

/// First token of the registry row that is the default dockyard.
pub const DEFAULT_REGISTRY_MARKER: &str = "->";

const MEMINFO_TOTAL: usize = 0;
const MEMINFO_FREE: usize = 1;
const MEMINFO_AVAILABLE: usize = 2;
const MEMINFO_BUFFERS: usize = 3;
const MEMINFO_CACHED: usize = 4;
const MEMINFO_SWAP_TOTAL: usize = 14;
const MEMINFO_SWAP_FREE: usize = 15;

pub fn node_catalog(stdout: &str) -> Result<Vec<NodeDescriptor>, ParseError> {
    Ok(serde_json::from_str(stdout)?)
}

#[derive(Deserialize)]
struct ServiceListing {
    result: Vec<RunningService>,
}

pub fn service_listing(stdout: &str) -> Result<Vec<RunningService>, ParseError> {
    let listing: ServiceListing = serde_json::from_str(stdout)?;
    Ok(listing.result)
}

/// Parse `dockyard list` output: a header line, then one row per
/// registry, `[->] alias address username password`.
pub fn registry_listing(stdout: &str) -> Result<Vec<RegistryEntry>, ParseError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .skip(1)
        .map(registry_row)
        .collect()
}

fn registry_row(line: &str) -> Result<RegistryEntry, ParseError> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    let is_default = tokens.first() == Some(&DEFAULT_REGISTRY_MARKER);
    if is_default {
        tokens.remove(0);
    }
    match tokens.as_slice() {
        [alias, address, username, password, ..] => Ok(RegistryEntry {
            alias: alias.to_string(),
            address: address.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            is_default,
        }),
        _ => Err(ParseError::RegistryRow {
            line: line.to_string(),
            found: tokens.len(),
        }),
    }
}

fn number<T: std::str::FromStr>(what: &'static str, token: &str) -> Result<T, ParseError> {
    token.parse().map_err(|_| ParseError::NotNumeric {
        what,
        token: token.to_string(),
    })
}

fn load(token: &str) -> Result<f64, ParseError> {
    let value: f64 = number("load average", token)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError::NotNumeric {
            what: "load average",
            token: token.to_string(),
        })
    }
}

/// Parse the 1, 5 and 15 minute averages from `/proc/loadavg`.
pub fn load_average(stdout: &str) -> Result<(f64, f64, f64), ParseError> {
    let tokens: Vec<&str> = stdout.split_whitespace().collect();
    match tokens.as_slice() {
        [one, five, fifteen, ..] => Ok((load(one)?, load(five)?, load(fifteen)?)),
        _ => Err(ParseError::MissingFields {
            what: "loadavg",
            expected: 3,
            found: tokens.len(),
        }),
    }
}

/// Memory figures from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

pub fn memory_info(stdout: &str) -> Result<MemInfo, ParseError> {
    let lines: Vec<&str> = stdout.lines().collect();
    let field = |index: usize| -> Result<u64, ParseError> {
        let line = lines
            .get(index)
            .ok_or(ParseError::MemInfoLine { index })?;
        let token = line
            .split_whitespace()
            .nth(1)
            .ok_or(ParseError::MemInfoLine { index })?;
        number("meminfo value", token)
    };
    Ok(MemInfo {
        total: field(MEMINFO_TOTAL)?,
        free: field(MEMINFO_FREE)?,
        available: field(MEMINFO_AVAILABLE)?,
        buffers: field(MEMINFO_BUFFERS)?,
        cached: field(MEMINFO_CACHED)?,
        swap_total: field(MEMINFO_SWAP_TOTAL)?,
        swap_free: field(MEMINFO_SWAP_FREE)?,
    })
}

pub fn cpu_count(stdout: &str) -> Result<u64, ParseError> {
    number("cpu count", stdout.trim())
}

impl LoadSample {
    pub fn from_parts(averages: (f64, f64, f64), mem: MemInfo, cpu_count: u64) -> Self {
        let (average_load_1, average_load_5, average_load_15) = averages;
        Self {
            average_load_1,
            average_load_5,
            average_load_15,
            total_memory_kb: mem.total,
            free_memory_kb: mem.free,
            used_memory_kb: mem.total.saturating_sub(mem.free),
            available_memory_kb: mem.available,
            buffers_kb: mem.buffers,
            cached_memory_kb: mem.cached,
            swap_total_kb: mem.swap_total,
            swap_free_kb: mem.swap_free,
            swap_used_kb: mem.swap_total.saturating_sub(mem.swap_free),
            cpu_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:           2000 kB
MemFree:             500 kB
MemAvailable:       1200 kB
Buffers:              40 kB
Cached:              300 kB
SwapCached:            0 kB
Active:              700 kB
Inactive:            400 kB
Active(anon):        500 kB
Inactive(anon):      100 kB
Active(file):        200 kB
Inactive(file):      300 kB
Unevictable:           0 kB
Mlocked:               0 kB
SwapTotal:          1024 kB
SwapFree:            256 kB
Dirty:                 8 kB
";

    #[test]
    fn registry_rows_in_order_with_default_marker() {
        let out = "\
Name      Address                    User   Password
->  dockyard  dockyard.example:5000  ops    s3cret
mirror    10.0.0.5:5000              -      -
";
        let entries = registry_listing(out).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            RegistryEntry {
                alias: "dockyard".into(),
                address: "dockyard.example:5000".into(),
                username: "ops".into(),
                password: "s3cret".into(),
                is_default: true,
            }
        );
        assert_eq!(entries[1].alias, "mirror");
        assert!(!entries[1].is_default);
    }

    #[test]
    fn registry_header_only_is_empty() {
        assert!(registry_listing("Name Address User Password\n")
            .unwrap()
            .is_empty());
        assert!(registry_listing("").unwrap().is_empty());
    }

    #[test]
    fn leading_blank_line_does_not_hide_header() {
        let out = "\nName Address User Password\n-> main d:5000 u p\n";
        let entries = registry_listing(out).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].alias, "main");
        assert!(entries[0].is_default);
    }

    #[test]
    fn short_registry_row_fails() {
        let out = "Name Address User Password\nfull a.example u p\n-> short a.example u\n";
        match registry_listing(out) {
            Err(ParseError::RegistryRow { found, .. }) => assert_eq!(found, 3),
            other => panic!("expected RegistryRow error, got {:?}", other),
        }
    }

    #[test]
    fn load_average_takes_first_three_tokens() {
        let (one, five, fifteen) = load_average("0.10 0.20 0.30 1/123 4567\n").unwrap();
        assert_eq!(one, 0.10);
        assert_eq!(five, 0.20);
        assert_eq!(fifteen, 0.30);
    }

    #[test]
    fn load_average_rejects_garbage() {
        assert!(matches!(
            load_average("0.10 oops 0.30"),
            Err(ParseError::NotNumeric { .. })
        ));
        assert!(matches!(
            load_average("NaN 0.1 0.2"),
            Err(ParseError::NotNumeric { .. })
        ));
        assert!(matches!(
            load_average("0.10"),
            Err(ParseError::MissingFields { found: 1, .. })
        ));
    }

    #[test]
    fn meminfo_fixed_lines_and_derived_usage() {
        let mem = memory_info(MEMINFO).unwrap();
        assert_eq!(mem.total, 2000);
        assert_eq!(mem.free, 500);
        assert_eq!(mem.available, 1200);
        assert_eq!(mem.buffers, 40);
        assert_eq!(mem.cached, 300);
        assert_eq!(mem.swap_total, 1024);
        assert_eq!(mem.swap_free, 256);

        let sample = LoadSample::from_parts((0.1, 0.2, 0.3), mem, 4);
        assert_eq!(sample.used_memory_kb, sample.total_memory_kb - sample.free_memory_kb);
        assert_eq!(sample.used_memory_kb, 1500);
        assert_eq!(sample.swap_used_kb, 768);
        assert_eq!(sample.cpu_count, 4);
    }

    #[test]
    fn truncated_meminfo_fails() {
        let short: String = MEMINFO.lines().take(10).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            memory_info(&short),
            Err(ParseError::MemInfoLine { index: 14 })
        ));
        let bad = MEMINFO.replace("500 kB", "lots kB");
        assert!(matches!(
            memory_info(&bad),
            Err(ParseError::NotNumeric { .. })
        ));
    }

    #[test]
    fn cpu_count_is_trimmed_integer() {
        assert_eq!(cpu_count("8\n").unwrap(), 8);
        assert!(cpu_count("eight").is_err());
    }

    #[test]
    fn service_listing_keeps_metadata() {
        let out = r#"{"status":"ok","result":[
            {"name":"armada","container_id":"c0ffee","address":"10.0.0.1:4000","status":"passing"},
            {"name":"billing","address":"10.0.0.1:4100"}
        ]}"#;
        let services = service_listing(out).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].container_id.as_deref(), Some("c0ffee"));
        assert_eq!(services[0].metadata["status"], "passing");
        assert_eq!(services[1].container_id, None);
    }

    #[test]
    fn catalog_requires_address() {
        let nodes = node_catalog(r#"[{"Node":"n1","Address":"10.0.0.1"}]"#).unwrap();
        assert_eq!(nodes[0].address, "10.0.0.1");
        assert_eq!(nodes[0].metadata["Node"], "n1");
        assert!(node_catalog(r#"[{"Node":"n1"}]"#).is_err());
    }
}
