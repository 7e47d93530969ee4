//! Terminal Viewer
//!
//! Read-only consumer of the store: every refresh it fetches the newest
//! readings and redraws a table. It never writes.

use ecobin_core::{Reading, TelemetryStore};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const COLUMNS: [(&str, usize); 8] = [
    ("Bin Id", 9),
    ("Location", 14),
    ("Timestamp", 19),
    ("Fill Level", 10),
    ("Temperature", 11),
    ("Humidity", 8),
    ("Relay Status", 12),
    ("Status", 23),
];

/// Render readings as a fixed-width table, newest first as given
pub fn render_table(readings: &[Reading]) -> String {
    let mut out = String::new();

    let header: Vec<String> = COLUMNS
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect();
    out.push_str(header.join(" │ ").trim_end());
    out.push('\n');

    let rule: Vec<String> = COLUMNS.iter().map(|(_, width)| "─".repeat(*width)).collect();
    out.push_str(&rule.join("─┼─"));
    out.push('\n');

    if readings.is_empty() {
        out.push_str("(no readings yet)\n");
        return out;
    }

    for r in readings {
        let cells = [
            r.bin_id.clone(),
            r.location.clone(),
            r.timestamp_string(),
            format!("{:.1}%", r.fill_level),
            format!("{:.1}°C", r.temperature),
            format!("{:.1}%", r.humidity),
            r.relay_status.to_string(),
            r.status.to_string(),
        ];
        let row: Vec<String> = cells
            .iter()
            .zip(COLUMNS.iter())
            .map(|(cell, (_, width))| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(row.join(" │ ").trim_end());
        out.push('\n');
    }
    out
}

/// Poll `latest(limit)` every `refresh` and redraw into `out` until cancelled.
///
/// With `once` set, draws a single frame without clearing the screen, and a
/// failed fetch is returned instead of retried on the next refresh.
pub async fn run_viewer<W: Write + Send>(
    store: Arc<dyn TelemetryStore>,
    limit: usize,
    refresh: Duration,
    once: bool,
    cancel: CancellationToken,
    mut out: W,
) -> std::io::Result<()> {
    if refresh.is_zero() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "viewer refresh interval must be positive",
        ));
    }
    let mut ticker = tokio::time::interval(refresh);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reader = store.clone();
        let fetched = tokio::task::spawn_blocking(move || reader.latest(limit)).await;
        let frame = match fetched {
            Ok(Ok(readings)) => render_table(&readings),
            Ok(Err(e)) if once => return Err(std::io::Error::other(e.to_string())),
            Ok(Err(e)) => {
                warn!(error = %e, "Viewer refresh failed");
                continue;
            }
            Err(e) if once => return Err(std::io::Error::other(e)),
            Err(e) => {
                warn!(error = %e, "Viewer refresh task failed");
                continue;
            }
        };

        if once {
            out.write_all(frame.as_bytes())?;
            out.flush()?;
            break;
        }

        write!(
            out,
            "\x1b[2J\x1b[H Smart Waste Monitoring System · latest {}\n\n{}",
            limit, frame
        )?;
        out.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ecobin_core::{RelayStatus, SqliteStore, Status};

    fn reading(bin_id: &str, minute: u32, fill_level: f64) -> Reading {
        Reading {
            bin_id: bin_id.to_string(),
            location: "Park Area".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 2, 2)
                .unwrap()
                .and_hms_opt(10, minute, 0)
                .unwrap(),
            fill_level,
            temperature: 36.2,
            humidity: 44.0,
            relay_status: RelayStatus::for_fill(fill_level),
            status: Status::HighTemperature,
        }
    }

    #[test]
    fn test_render_table_rows() {
        let table = render_table(&[reading("EBIN003", 5, 92.4), reading("EBIN003", 4, 89.0)]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Bin Id"));
        assert!(lines[0].contains("Relay Status"));
        assert!(lines[2].contains("2024-02-02 10:05:00"));
        assert!(lines[2].contains("92.4%"));
        assert!(lines[2].contains("36.2°C"));
        assert!(lines[2].contains(" ON "));
        assert!(lines[2].ends_with("ALERT: High Temperature"));
        assert!(lines[3].contains("OFF"));
    }

    #[test]
    fn test_render_empty() {
        let table = render_table(&[]);
        assert!(table.contains("(no readings yet)"));
    }

    #[tokio::test]
    async fn test_single_frame() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.ensure_schema().unwrap();
        for minute in 0..4 {
            store.append(&reading("EBIN001", minute, 10.0 + minute as f64)).unwrap();
        }

        let mut out = Vec::new();
        run_viewer(
            store,
            2,
            Duration::from_millis(10),
            true,
            CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("10:03:00"));
        assert!(text.contains("10:02:00"));
        assert!(!text.contains("10:01:00"));
    }

    #[tokio::test]
    async fn test_single_frame_returns_fetch_error() {
        // No schema, so every fetch fails
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        let mut out = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_viewer(
                store,
                5,
                Duration::from_millis(10),
                true,
                CancellationToken::new(),
                &mut out,
            ),
        )
        .await
        .expect("single-frame viewer must not retry forever");

        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_zero_refresh_rejected() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let err = run_viewer(
            store,
            5,
            Duration::ZERO,
            false,
            CancellationToken::new(),
            Vec::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
