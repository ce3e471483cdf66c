use crate::analysis::{Outcome, RunReport};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

/// Table of every symbol that produced a signal, failed or was skipped.
/// Symbols without a signal are only counted in the title.
pub fn summary_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Asset").add_attribute(Attribute::Bold),
            Cell::new("Result").add_attribute(Attribute::Bold),
            Cell::new("Bar Close").add_attribute(Attribute::Bold),
            Cell::new("Details").add_attribute(Attribute::Bold),
        ]);

    let mut rows: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o.outcome, Outcome::NoSignal { .. }))
        .collect();
    rows.sort_by_key(|o| (rank(&o.outcome), o.symbol.clone()));

    for entry in rows {
        let (result, color, close_time, details) = match &entry.outcome {
            Outcome::Signal {
                close_time,
                notified,
            } => (
                "PINBAR",
                Color::Green,
                close_time.as_str(),
                if *notified { "alert sent" } else { "alert not delivered" }.to_string(),
            ),
            Outcome::Failed(reason) => ("FAILED", Color::Red, "-", reason.clone()),
            Outcome::Skipped(reason) => ("SKIPPED", Color::DarkYellow, "-", reason.clone()),
            Outcome::NoSignal { .. } => continue,
        };

        table.add_row(vec![
            Cell::new(entry.symbol.as_str()).fg(Color::Cyan),
            Cell::new(result).fg(color).add_attribute(Attribute::Bold),
            Cell::new(close_time).set_alignment(CellAlignment::Right),
            Cell::new(details).fg(Color::DarkGrey),
        ]);
    }

    table
}

pub fn summary_title(report: &RunReport) -> String {
    let total = report.outcomes.len();
    let signals = report.signals().count();
    let failed = report.failures().count();
    let skipped = report.skipped().count();
    format!(
        "({} timeframe: {total} symbols, {signals} pinbars, {} clean, {skipped} skipped, {failed} failed)",
        report.interval,
        total - signals - failed - skipped,
    )
}

fn rank(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Signal { .. } => 0,
        Outcome::Failed(_) => 1,
        Outcome::Skipped(_) => 2,
        Outcome::NoSignal { .. } => 3,
    }
}
