//! Snapshot presentation - dual-timezone timestamp rendering and the CLI table
//!
//! Every timestamp is rendered two ways from the same stored instant: UTC wall
//! time and a fixed named zone (Etc/GMT+8, i.e. UTC-8). Two renderings, one
//! clock.

use crate::service::{Snapshot, SnapshotEntry};
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use std::fmt::Write;

/// Fixed display zone, UTC-8 (POSIX sign convention: Etc/GMT+8 is west of UTC)
pub const DISPLAY_TZ: Tz = chrono_tz::Etc::GMTPlus8;

/// Render an instant as UTC wall time
pub fn format_utc(at: DateTime<FixedOffset>) -> String {
    at.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Render the same instant in the fixed display zone
pub fn format_display_zone(at: DateTime<FixedOffset>) -> String {
    at.with_timezone(&DISPLAY_TZ)
        .format("%Y-%m-%d %H:%M UTC-8")
        .to_string()
}

/// Gold is quoted as a currency (ounces per base unit); invert for the
/// familiar price-per-ounce reading
fn gold_note(entry: &SnapshotEntry) -> Option<String> {
    if entry.target == "XAU" && entry.rate > 0.0 {
        Some(format!("1 oz = {:.2} {}", 1.0 / entry.rate, entry.base))
    } else {
        None
    }
}

/// Plain-text table of a snapshot for the CLI
pub fn render_table(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    if snapshot.entries.is_empty() {
        out.push_str("No observations recorded yet.\n");
        return out;
    }

    let _ = writeln!(
        out,
        "{:<6}{:<8}{:<16}{:<26}{}",
        "Base", "Target", "Rate", "Observed (UTC)", "Observed (UTC-8)"
    );
    let _ = writeln!(out, "{}", "-".repeat(86));

    for entry in &snapshot.entries {
        let _ = write!(
            out,
            "{:<6}{:<8}{:<16.6}{:<26}{}",
            entry.base,
            entry.target,
            entry.rate,
            format_utc(entry.timestamp),
            format_display_zone(entry.timestamp),
        );
        if let Some(note) = gold_note(entry) {
            let _ = write!(out, "  ({})", note);
        }
        out.push('\n');
    }

    if let Some(last_update) = snapshot.last_update {
        let _ = writeln!(
            out,
            "\nLast update: {} / {}",
            format_utc(last_update),
            format_display_zone(last_update)
        );
    }

    out
}
