//! Text parsing for command and procfs output

use super::FilesystemUsage;

/// Root (`/`) row of `df -m` output.
///
/// Column positions are located from the `Use%` field so device names and
/// mount points containing a space still parse, and localized headers are
/// skipped because they carry no `%` field followed by `/`.
pub fn parse_root_filesystem(df_output: &str) -> Option<FilesystemUsage> {
    for line in df_output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }

        let Some(percent_idx) = (2..=parts.len() - 2)
            .rev()
            .find(|&idx| parts[idx].ends_with('%'))
        else {
            continue;
        };
        if percent_idx < 4 {
            continue;
        }

        let mount_point = parts[percent_idx + 1..].join(" ");
        if mount_point != "/" {
            continue;
        }

        let total_mb: u64 = parts[percent_idx - 3].parse().ok()?;
        let used_percent: u8 = parts[percent_idx].trim_end_matches('%').parse().ok()?;
        return Some(FilesystemUsage {
            root_fs_total: next_power_of_two_gb(total_mb),
            root_fs_used_percent: used_percent,
        });
    }
    None
}

/// MB size rounded up to a power of two and expressed in GB (SD card sizes)
pub fn next_power_of_two_gb(size_mb: u64) -> u64 {
    let rounded = size_mb.max(1).next_power_of_two();
    (rounded as f64 / 1024.0).round() as u64
}

/// First BogoMIPS figure in `/proc/cpuinfo` or `lscpu` output
pub fn parse_bogomips(cpuinfo: &str) -> Option<f64> {
    cpuinfo
        .lines()
        .filter(|line| line.trim_start().to_lowercase().starts_with("bogomips"))
        .find_map(|line| line.split(':').nth(1)?.trim().parse().ok())
}

/// `uptime`-style text: `17 min`, `4:05`, `3 days, 4:05`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    let clock = if hours > 0 {
        format!("{}:{:02}", hours, minutes)
    } else {
        format!("{} min", minutes)
    };

    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

/// Thermal zone reading in millidegrees to °C with one decimal
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    let milli: f64 = raw.trim().parse().ok()?;
    Some((milli / 100.0).round() / 10.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
