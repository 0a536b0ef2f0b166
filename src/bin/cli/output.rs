//! Output formatting for CLI operations.

use std::time::Duration;

use stackio::{RequestStatus, Statistic};

/// Summary of a `read` run.
pub struct ReadSummary {
    pub status: RequestStatus,
    pub bytes: u64,
    pub chunks: usize,
    pub crc32: u32,
    pub elapsed: Duration,
}

/// Formats the result of a read.
pub fn format_read_summary(summary: &ReadSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Status:  {:?}\n", summary.status));
    output.push_str(&format!(
        "Bytes:   {} ({})\n",
        summary.bytes,
        humanize_bytes(summary.bytes)
    ));
    output.push_str(&format!("Chunks:  {}\n", summary.chunks));
    output.push_str(&format!("CRC-32:  {:08X}\n", summary.crc32));

    let seconds = summary.elapsed.as_secs_f64();
    if seconds > 0.0 {
        output.push_str(&format!(
            "Time:    {:.3}s ({}/s)\n",
            seconds,
            humanize_bytes((summary.bytes as f64 / seconds) as u64)
        ));
    }
    output
}

/// Formats statistics grouped by the node that produced them.
pub fn format_statistics(title: &str, statistics: &[Statistic]) -> String {
    let mut output = String::new();
    output.push_str(title);
    output.push('\n');
    output.push_str(&"-".repeat(70));
    output.push('\n');

    let width = statistics.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut owner: Option<&str> = None;
    for statistic in statistics {
        if owner != Some(statistic.owner.as_str()) {
            owner = Some(statistic.owner.as_str());
            output.push_str(&format!("[{}]\n", statistic.owner));
        }
        output.push_str(&format!(
            "  {:<width$}  {}\n",
            statistic.name,
            statistic.value,
            width = width
        ));
    }
    output
}

/// Formats a byte count with a binary unit.
pub fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(16 * 1024), "16.0 KiB");
        assert_eq!(humanize_bytes(3 * 1024 * 1024 / 2), "1.5 MiB");
    }

    #[test]
    fn test_statistics_grouped_by_owner() {
        let statistics = vec![
            Statistic::integer("Drive", "Slots", 4, "Slots."),
            Statistic::integer("Drive", "Seeks", 1, "Seeks."),
            Statistic::integer("Scheduler", "Ticks", 9, "Ticks."),
        ];
        let text = format_statistics("Statistics", &statistics);
        assert_eq!(text.matches("[Drive]").count(), 1);
        assert!(text.contains("[Scheduler]"));
        assert!(text.contains("Ticks  9"));
    }
}
