//! On-demand memory usage reporting.
//!
//! A debugging side channel: the allocator's named-allocation tracking is
//! aggregated into a report and dumped as a JSON file. Not part of the
//! steady-state rendering contract.

use crate::error::Result;
use serde::Serialize;
use std::path::Path;

/// Kind of tracked GPU resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Buffer,
    Image,
}

/// One tracked allocation.
#[derive(Clone, Debug, Serialize)]
pub struct AllocationInfo {
    pub name: String,
    pub kind: ResourceKind,
    pub size: u64,
}

/// Aggregated memory usage snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct MemoryReport {
    pub total_bytes: u64,
    pub buffer_bytes: u64,
    pub image_bytes: u64,
    pub allocations: Vec<AllocationInfo>,
}

impl MemoryReport {
    /// Aggregate a report from tracked allocations.
    ///
    /// Entries come out sorted by name then size so repeated dumps diff
    /// cleanly.
    pub fn from_entries(entries: impl IntoIterator<Item = AllocationInfo>) -> Self {
        let mut allocations: Vec<AllocationInfo> = entries.into_iter().collect();
        allocations.sort_by(|a, b| a.name.cmp(&b.name).then(a.size.cmp(&b.size)));

        let mut buffer_bytes = 0;
        let mut image_bytes = 0;
        for alloc in &allocations {
            match alloc.kind {
                ResourceKind::Buffer => buffer_bytes += alloc.size,
                ResourceKind::Image => image_bytes += alloc.size,
            }
        }

        Self {
            total_bytes: buffer_bytes + image_bytes,
            buffer_bytes,
            image_bytes,
            allocations,
        }
    }
}

/// Write a memory report as pretty-printed JSON.
pub fn write_report(report: &MemoryReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    tracing::info!(path = %path.display(), total_bytes = report.total_bytes, "wrote memory report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: ResourceKind, size: u64) -> AllocationInfo {
        AllocationInfo {
            name: name.to_string(),
            kind,
            size,
        }
    }

    #[test]
    fn report_aggregates_per_kind_totals() {
        let report = MemoryReport::from_entries([
            entry("depth frame 0", ResourceKind::Image, 4096),
            entry("transform buffer", ResourceKind::Buffer, 256),
            entry("depth frame 1", ResourceKind::Image, 4096),
        ]);

        assert_eq!(report.buffer_bytes, 256);
        assert_eq!(report.image_bytes, 8192);
        assert_eq!(report.total_bytes, 8448);
    }

    #[test]
    fn report_entries_are_sorted_for_stable_output() {
        let report = MemoryReport::from_entries([
            entry("b", ResourceKind::Buffer, 2),
            entry("a", ResourceKind::Buffer, 1),
        ]);

        let names: Vec<&str> = report.allocations.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn report_serializes_to_json() {
        let report =
            MemoryReport::from_entries([entry("depth", ResourceKind::Image, 1024)]);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"total_bytes\":1024"));
        assert!(json.contains("\"kind\":\"image\""));
    }
}
