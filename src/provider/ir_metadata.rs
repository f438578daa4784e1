//! Provider-computed ir_metadata sections (schema version 0.2).
//!
//! Keys follow the ir_metadata vocabulary (`platform`, `implementation.source`,
//! `resources`). Sections without any reported measure are left out entirely.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::Result;
use crate::measure::{Measure, ResultSet};

pub const SCHEMA_VERSION: &str = "0.2";

fn plain(results: &ResultSet, measure: Measure) -> Option<Value> {
    results.value(measure).map(|v| v.to_yaml())
}

fn with_unit(results: &ResultSet, measure: Measure, unit: &str) -> Option<Value> {
    results
        .value(measure)
        .map(|v| Value::String(format!("{} {}", v, unit)))
}

/// Build a mapping from the present entries; `None` when nothing is present.
fn section(entries: Vec<(&str, Option<Value>)>) -> Option<Value> {
    let mut map = Mapping::new();
    for (key, value) in entries {
        if let Some(value) = value {
            map.insert(Value::String(key.to_string()), value);
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Mapping(map))
    }
}

fn platform(r: &ResultSet) -> Option<Value> {
    let cpu = section(vec![
        ("model", plain(r, Measure::CpuModelName)),
        ("architecture", plain(r, Measure::CpuArchitecture)),
        ("number of cores", plain(r, Measure::CpuCoresPerSocket)),
        ("available cores", plain(r, Measure::CpuAvailableSystemCores)),
        ("features", plain(r, Measure::CpuFeatures)),
        ("frequency", with_unit(r, Measure::CpuFrequencyMhz, "MHz")),
        ("frequency min", with_unit(r, Measure::CpuFrequencyMinMhz, "MHz")),
        ("frequency max", with_unit(r, Measure::CpuFrequencyMaxMhz, "MHz")),
        ("vendor id", plain(r, Measure::CpuVendorId)),
        ("byte order", plain(r, Measure::CpuByteOrder)),
        ("threads per core", plain(r, Measure::CpuThreadsPerCore)),
        ("caches", plain(r, Measure::CpuCaches)),
        ("virtualization", plain(r, Measure::CpuVirtualization)),
    ]);
    let gpu = section(vec![
        ("model", plain(r, Measure::GpuModelName)),
        ("memory", with_unit(r, Measure::GpuVramAvailableSystemMb, "MB")),
        ("number of cores", plain(r, Measure::GpuNumCores)),
        ("supported", plain(r, Measure::GpuSupported)),
    ]);
    let hardware = section(vec![
        ("cpu", cpu),
        ("gpu", gpu),
        ("ram", with_unit(r, Measure::RamAvailableSystemMb, "MB")),
    ]);
    let os = section(vec![
        ("kernel", plain(r, Measure::OsKernel)),
        ("distribution", plain(r, Measure::OsName)),
    ]);
    section(vec![("hardware", hardware), ("operating system", os)])
}

fn implementation(r: &ResultSet) -> Option<Value> {
    let source = section(vec![
        ("repository", plain(r, Measure::GitRemoteOrigin)),
        ("commit", plain(r, Measure::GitLastCommitHash)),
        ("is repo", plain(r, Measure::GitIsRepo)),
        ("hash", plain(r, Measure::GitHash)),
        ("branch", plain(r, Measure::GitBranch)),
        ("upstream branch", plain(r, Measure::GitBranchUpstream)),
        ("tags", plain(r, Measure::GitTags)),
        ("uncommitted changes", plain(r, Measure::GitUncommittedChanges)),
        ("unpushed changes", plain(r, Measure::GitUnpushedChanges)),
        ("unchecked files", plain(r, Measure::GitUncheckedFiles)),
        ("root", plain(r, Measure::GitRoot)),
        ("archive path", plain(r, Measure::GitArchivePath)),
    ]);
    section(vec![("source", source)])
}

fn resources(r: &ResultSet) -> Option<Value> {
    let runtime = section(vec![
        ("start time", plain(r, Measure::TimeStart)),
        ("stop time", plain(r, Measure::TimeStop)),
        ("wallclock", with_unit(r, Measure::TimeElapsedWallClockMs, "ms")),
        ("user", with_unit(r, Measure::TimeElapsedUserMs, "ms")),
        ("system", with_unit(r, Measure::TimeElapsedSystemMs, "ms")),
    ]);
    let cpu = section(vec![
        ("used process", plain(r, Measure::CpuUsedProcessPercent)),
        ("used system", plain(r, Measure::CpuUsedSystemPercent)),
        ("energy used system", with_unit(r, Measure::CpuEnergySystemJoules, "J")),
    ]);
    let gpu = section(vec![
        ("used process", plain(r, Measure::GpuUsedProcessPercent)),
        ("used system", plain(r, Measure::GpuUsedSystemPercent)),
        ("vram used process", plain(r, Measure::GpuVramUsedProcessMb)),
        ("vram used system", plain(r, Measure::GpuVramUsedSystemMb)),
        ("energy used system", with_unit(r, Measure::GpuEnergySystemJoules, "J")),
    ]);
    let ram = section(vec![
        ("used process", with_unit(r, Measure::RamUsedProcessKb, "KB")),
        ("used system", with_unit(r, Measure::RamUsedSystemMb, "MB")),
        ("energy used system", with_unit(r, Measure::RamEnergySystemJoules, "J")),
    ]);
    section(vec![
        ("runtime", runtime),
        ("cpu", cpu),
        ("gpu", gpu),
        ("ram", ram),
    ])
}

/// The native document for a run. `result` entries win over `baseline` ones.
pub fn native_document(baseline: &ResultSet, result: &ResultSet) -> Value {
    let mut merged = baseline.clone();
    merged.merge(result.clone());

    let mut doc = Mapping::new();
    doc.insert(
        Value::String("schema version".to_string()),
        Value::String(SCHEMA_VERSION.to_string()),
    );
    for (key, value) in [
        ("platform", platform(&merged)),
        ("implementation", implementation(&merged)),
        ("resources", resources(&merged)),
    ] {
        if let Some(value) = value {
            doc.insert(Value::String(key.to_string()), value);
        }
    }
    Value::Mapping(doc)
}

pub fn write_native(baseline: &ResultSet, result: &ResultSet, destination: &Path) -> Result<()> {
    let doc = native_document(baseline, result);
    let text = serde_yaml::to_string(&doc)?;
    std::fs::write(destination, text)?;
    tracing::debug!(path = %destination.display(), "Wrote native ir_metadata document");
    Ok(())
}
