//! Console rendering of metrics snapshots

use anyhow::{Context, Result};
use colored::*;

use crate::metrics::Snapshot;

const NAME_WIDTH: usize = 32;
const COUNT_WIDTH: usize = 12;

/// Render a snapshot as a fixed-width table
pub fn render_table(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "{} {}\n",
        "=== BLE-MIDI Devices ===".bold().cyan(),
        snapshot
            .taken_at
            .format("%H:%M:%S%.3f")
            .to_string()
            .dimmed()
    ));
    out.push_str(&format!(
        "{:<name$} {:>count$} {:>count$}  {}\n",
        "Name".bold(),
        "MIDI msgs".bold(),
        "BLE pkts".bold(),
        "Container".bold(),
        name = NAME_WIDTH,
        count = COUNT_WIDTH,
    ));
    out.push_str(&format!(
        "{}\n",
        "─".repeat(NAME_WIDTH + 2 * COUNT_WIDTH + 42).dimmed()
    ));

    if snapshot.rows.is_empty() {
        out.push_str(&format!("{}\n", "No open MIDI transports".dimmed()));
        return out;
    }

    for row in &snapshot.rows {
        out.push_str(&format!(
            "{:<name$} {:>count$} {:>count$}  {}\n",
            truncate(&row.name, NAME_WIDTH).bright_white(),
            row.midi_message_count.to_string().green(),
            row.ble_packet_count.to_string().yellow(),
            row.container_id.as_str().dimmed(),
            name = NAME_WIDTH,
            count = COUNT_WIDTH,
        ));
    }
    out
}

/// Render a snapshot as a single JSON line
pub fn render_json(snapshot: &Snapshot) -> Result<String> {
    serde_json::to_string(snapshot).context("Failed to serialize snapshot")
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let mut cut: String = name.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
