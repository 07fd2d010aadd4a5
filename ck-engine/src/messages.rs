//! Operator-facing notification text.

use std::time::Duration;

pub fn cooldown_started(display_name: &str, duration: Duration) -> String {
    format!(
        "⚡ Cooldown started for {display_name}. I'll remind you in {}.",
        format_duration(duration)
    )
}

pub fn cooldown_over(display_name: &str) -> String {
    format!("✅ Your cooldown for {display_name} is over.")
}

pub fn still_active(display_name: &str, remaining: Duration) -> String {
    format!(
        "⏳ {display_name} is still on cooldown: {} left.",
        format_duration(remaining)
    )
}

/// `90s` → `1m 30s`; sub-second remainders round up.
pub fn format_duration(duration: Duration) -> String {
    let mut total = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        total += 1;
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}
