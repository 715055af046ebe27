//! Human-readable table rendering for run reports.

use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use crate::metrics::RunReport;

/// Format a report as summary and per-client tables.
pub fn format_table(report: &RunReport) -> String {
    let mut output = String::new();

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["Field", "Value"]);
    summary.add_row(vec![Cell::new("Broker"), Cell::new(&report.broker)]);
    summary.add_row(vec![Cell::new("Topic"), Cell::new(&report.topic)]);
    summary.add_row(vec![Cell::new("Protocol"), Cell::new(&report.protocol)]);
    summary.add_row(vec![Cell::new("QoS"), Cell::new(report.qos)]);
    summary.add_row(vec![Cell::new("Publishers"), Cell::new(report.publisher_count)]);
    summary.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format!("{:.2}s", report.duration_secs)),
    ]);
    summary.add_row(vec![Cell::new("Sent"), Cell::new(report.total_sent)]);
    summary.add_row(vec![Cell::new("Acked"), Cell::new(report.total_acked)]);
    summary.add_row(vec![Cell::new("Received"), Cell::new(report.total_received)]);
    summary.add_row(vec![
        Cell::new("Lost"),
        Cell::new(format!("{} ({:.2}%)", report.lost, report.loss_pct)),
    ]);
    summary.add_row(vec![Cell::new("Errors"), Cell::new(report.error_count)]);
    if let Some(latency) = &report.latency {
        summary.add_row(vec![
            Cell::new("Latency (ms)"),
            Cell::new(format!(
                "min {:.2} / p50 {:.2} / p95 {:.2} / p99 {:.2} / max {:.2}",
                latency.min_ms, latency.p50_ms, latency.p95_ms, latency.p99_ms, latency.max_ms
            )),
        ]);
    }

    let verdict = if report.passed {
        Cell::new("PASS").fg(Color::Green)
    } else {
        Cell::new("FAIL").fg(Color::Red)
    };
    summary.add_row(vec![Cell::new("Result"), verdict]);

    output.push_str(&format!("{summary}\n"));

    let mut clients = Table::new();
    clients.load_preset(UTF8_FULL);
    clients.set_header(vec!["Client", "Role", "Sent", "Acked", "Received", "Errors"]);
    for client in &report.clients {
        let errors = if client.error_count > 0 {
            Cell::new(client.error_count).fg(Color::Red)
        } else {
            Cell::new(0)
        };
        clients.add_row(vec![
            Cell::new(&client.client_id),
            Cell::new(client.role),
            Cell::new(client.sent),
            Cell::new(client.acked),
            Cell::new(client.received),
            errors,
        ]);
    }
    output.push_str(&format!("{clients}\n"));

    if !report.errors.is_empty() {
        output.push_str("Errors:\n");
        for event in &report.errors {
            output.push_str(&format!(
                "  {} [{:?}] {}\n",
                event.at.format("%H:%M:%S%.3f"),
                event.kind,
                event.cause
            ));
        }
    }

    output
}
