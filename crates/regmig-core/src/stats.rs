//! Shared transfer statistics and the final summary table

use crate::types::{FileStat, MigrationSummary, TransferStatus};
use crate::utils::format_size;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only log of per-file outcomes shared by every job of a run
#[derive(Clone, Default)]
pub struct TransferStats {
    entries: Arc<Mutex<Vec<FileStat>>>,
}

/// Counts over a set of [`FileStat`]s
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_transferred: u64,
}

impl StatsSummary {
    pub fn from_stats(stats: &[FileStat]) -> Self {
        stats.iter().fold(Self::default(), |mut acc, stat| {
            match stat.status {
                TransferStatus::Success => {
                    acc.success += 1;
                    acc.bytes_transferred += stat.size;
                }
                TransferStatus::Failed => acc.failed += 1,
                TransferStatus::Skipped => acc.skipped += 1,
            }
            acc
        })
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, stat: FileStat) {
        self.entries.lock().await.push(stat);
    }

    pub async fn snapshot(&self) -> Vec<FileStat> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn summary(&self) -> StatsSummary {
        StatsSummary::from_stats(&self.entries.lock().await)
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let kept: String = value.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

/// Format a migration summary for display
pub fn format_summary(summary: &MigrationSummary) -> String {
    let counts = StatsSummary::from_stats(&summary.stats);
    let mut lines = Vec::new();

    lines.push(String::new());
    lines.push("╔══════════════════════════════════════════════════════════════════════════════════════════╗".to_string());
    lines.push(format!("║  {:<88}║", "Migration Summary"));
    lines.push("╠══════════════════════════════════════════════════════════════════════════════════════════╣".to_string());

    let status = match (summary.success, summary.dry_run) {
        (true, true) => "✅ SUCCESS (dry run)",
        (true, false) => "✅ SUCCESS",
        (false, _) => "❌ FAILED",
    };
    lines.push(format!("║  Status:   {:<78}║", status));
    lines.push(format!("║  Duration: {:<78}║", format!("{}ms", summary.duration_ms)));
    lines.push(format!(
        "║  Files:    {:<78}║",
        format!(
            "{} copied ({}), {} skipped, {} failed",
            counts.success,
            format_size(counts.bytes_transferred),
            counts.skipped,
            counts.failed
        )
    ));

    lines.push("╠══════════════════════════════════════════════════════════════════════════════════════════╣".to_string());
    for outcome in &summary.mappings {
        let icon = if outcome.error.is_none() { "✅" } else { "❌" };
        lines.push(format!("║  {} {:<85}║", icon, truncate(&outcome.mapping, 85)));
    }

    if !summary.stats.is_empty() {
        lines.push("╠══════════════════════════════════════════════════════════════════════════════════════════╣".to_string());
        lines.push(format!(
            "║  {:<18} │ {:<12} │ {:<27} │ {:>10} │ {:<9}║",
            "Name", "Registry", "URI", "Size", "Status"
        ));
        for stat in &summary.stats {
            lines.push(format!(
                "║  {:<18} │ {:<12} │ {:<27} │ {:>10} │ {:<9}║",
                truncate(&stat.name, 18),
                truncate(&stat.registry, 12),
                truncate(&stat.uri, 27),
                format_size(stat.size),
                stat.status.as_str()
            ));
            if let Some(ref error) = stat.error {
                lines.push(format!("║      ↳ {:<82}║", truncate(error, 82)));
            }
        }
    }

    lines.push("╚══════════════════════════════════════════════════════════════════════════════════════════╝".to_string());
    lines.push(String::new());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{File, MappingOutcome};

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let stats = TransferStats::new();
        let mut handles = Vec::new();
        for i in 0..50 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                let file = File::new("repo", format!("/f{}.bin", i), 10);
                stats.record(FileStat::success(&file)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stats.len().await, 50);
        let summary = stats.summary().await;
        assert_eq!(summary.success, 50);
        assert_eq!(summary.bytes_transferred, 500);
    }

    #[test]
    fn test_table_includes_failed_rows_with_errors() {
        let ok = File::new("libs", "/a.jar", 2048);
        let bad = File::new("libs", "/b.jar", 1);
        let summary = MigrationSummary {
            success: false,
            dry_run: false,
            mappings: vec![MappingOutcome {
                mapping: "MAVEN libs -> libs".to_string(),
                error: Some("boom".to_string()),
            }],
            stats: vec![FileStat::success(&ok), FileStat::failed(&bad, "upload rejected")],
            duration_ms: 12,
        };

        let table = format_summary(&summary);
        assert!(table.contains("FAILED"));
        assert!(table.contains("/b.jar"));
        assert!(table.contains("║  Name "));
        let failed_row = table.lines().find(|l| l.contains("/b.jar")).unwrap();
        assert!(failed_row.starts_with("║  b.jar "));
        assert!(failed_row.contains("failed"));
        assert!(table.contains("upload rejected"));
        assert!(table.contains("1 copied (2.0 KB), 0 skipped, 1 failed"));
    }
}
