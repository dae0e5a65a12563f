//! CSV and PDF downloads of data the console already fetched.

use crate::models::report::{ReportRollup, ReportRow};
use crate::models::system::System;
use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("export buffer failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("pdf rendering failed: {0}")]
    Pdf(#[from] printpdf::Error),
}

const REPORT_HEADERS: [&str; 9] = [
    "System ID",
    "Name",
    "Availability (%)",
    "SLA Target (%)",
    "SLA Met",
    "MTTR (min)",
    "Incidents",
    "Downtime (min)",
    "Status",
];

fn report_record(row: &ReportRow) -> [String; 9] {
    [
        row.system_id.clone(),
        row.name.clone(),
        format!("{:.2}", row.availability),
        format!("{:.2}", row.sla_target),
        if row.sla_met { "yes" } else { "no" }.to_string(),
        format!("{:.2}", row.mttr_minutes),
        row.incidents.to_string(),
        format!("{:.2}", row.downtime_minutes),
        row.status.clone(),
    ]
}

pub fn report_csv(rows: &[ReportRow]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADERS)?;
    for row in rows {
        writer.write_record(report_record(row))?;
    }
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

pub fn systems_csv(systems: &[System]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "ID",
        "Name",
        "Type",
        "Connection",
        "Status",
        "Criticality",
        "SLA Target (%)",
        "Check Interval (s)",
        "Target",
        "Owner",
        "Company",
    ])?;
    for s in systems {
        let sla_target = s.sla_target.to_string();
        let check_interval = s.check_interval.to_string();
        writer.write_record([
            s.id.as_str(),
            s.name.as_str(),
            s.system_type.as_str(),
            s.connection_type.as_str(),
            s.status.as_str(),
            s.criticality_level.as_str(),
            sla_target.as_str(),
            check_interval.as_str(),
            s.target.as_str(),
            s.owner.as_deref().unwrap_or(""),
            s.company.as_deref().unwrap_or(""),
        ])?;
    }
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

/// File name for a download, e.g. `infrawatch-report-2026-10-16.csv`.
pub fn export_filename(kind: &str, extension: &str, now: DateTime<Utc>) -> String {
    format!("infrawatch-{}-{}.{}", kind, now.format("%Y-%m-%d"), extension)
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 14.0;
const LINE_MM: f32 = 5.0;
const BODY_PT: f32 = 9.0;
const TITLE_PT: f32 = 16.0;

struct Column {
    header: &'static str,
    x: f32,
    max_chars: usize,
}

const REPORT_COLUMNS: [Column; 7] = [
    Column { header: "System", x: MARGIN_MM, max_chars: 30 },
    Column { header: "Avail. %", x: 76.0, max_chars: 8 },
    Column { header: "SLA %", x: 95.0, max_chars: 8 },
    Column { header: "Met", x: 113.0, max_chars: 3 },
    Column { header: "MTTR min", x: 125.0, max_chars: 9 },
    Column { header: "Incidents", x: 146.0, max_chars: 9 },
    Column { header: "Down min", x: 169.0, max_chars: 10 },
];

#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    x: f32,
    y: f32,
    size: f32,
    bold: bool,
    text: String,
}

impl TextRun {
    fn new(x: f32, y: f32, size: f32, text: impl Into<String>) -> Self {
        Self { x, y, size, bold: false, text: text.into() }
    }

    fn bold(mut self) -> Self {
        self.bold = true;
        self
    }
}

/// The built-in Helvetica only covers Latin-1; other characters print as
/// `?`. Cells longer than their column end in `~`.
fn fit(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.chars().enumerate() {
        if i == max_chars {
            out.pop();
            out.push('~');
            break;
        }
        match c {
            ' '..='~' | '\u{a0}'..='\u{ff}' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn column_headers(page: &mut Vec<TextRun>, y: f32) {
    for col in &REPORT_COLUMNS {
        page.push(TextRun::new(col.x, y, BODY_PT, col.header).bold());
    }
}

/// Places the report on A4 pages. The title block and rollup sit on the
/// first page; the column header repeats on every page.
fn layout_report(
    title: &str,
    period: &str,
    generated_at: DateTime<Utc>,
    rollup: &ReportRollup,
    rows: &[ReportRow],
) -> Vec<Vec<TextRun>> {
    let mut pages = Vec::new();
    let mut page = Vec::new();
    let mut y = PAGE_HEIGHT_MM - MARGIN_MM - LINE_MM;

    page.push(TextRun::new(MARGIN_MM, y, TITLE_PT, fit(title, 60)).bold());
    y -= LINE_MM * 1.5;
    let header_lines = [
        format!("Period: {}", period),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M UTC")),
        format!(
            "Systems: {}   Avg availability: {:.2}%   SLA compliance: {:.2}%",
            rollup.systems, rollup.average_availability, rollup.sla_compliance
        ),
        format!(
            "Incidents: {}   Total downtime: {:.2} min   Avg MTTR: {:.2} min",
            rollup.total_incidents, rollup.total_downtime_minutes, rollup.average_mttr_minutes
        ),
    ];
    for line in &header_lines {
        page.push(TextRun::new(MARGIN_MM, y, BODY_PT, fit(line, 100)));
        y -= LINE_MM;
    }
    y -= LINE_MM;

    column_headers(&mut page, y);
    y -= LINE_MM;

    if rows.is_empty() {
        page.push(TextRun::new(MARGIN_MM, y, BODY_PT, "No systems in this period."));
    }

    for row in rows {
        if y < MARGIN_MM {
            pages.push(std::mem::take(&mut page));
            y = PAGE_HEIGHT_MM - MARGIN_MM - LINE_MM;
            column_headers(&mut page, y);
            y -= LINE_MM;
        }
        let cells = [
            row.name.clone(),
            format!("{:.2}", row.availability),
            format!("{:.2}", row.sla_target),
            if row.sla_met { "yes" } else { "no" }.to_string(),
            format!("{:.2}", row.mttr_minutes),
            row.incidents.to_string(),
            format!("{:.2}", row.downtime_minutes),
        ];
        for (col, cell) in REPORT_COLUMNS.iter().zip(cells.iter()) {
            page.push(TextRun::new(col.x, y, BODY_PT, fit(cell, col.max_chars)));
        }
        y -= LINE_MM;
    }
    pages.push(page);
    pages
}

/// Renders the report as a paginated table in memory.
pub fn report_pdf(
    title: &str,
    period: &str,
    generated_at: DateTime<Utc>,
    rollup: &ReportRollup,
    rows: &[ReportRow],
) -> Result<Vec<u8>, ExportError> {
    let pages = layout_report(title, period, generated_at, rollup, rows);

    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Report");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let mut first = Some((first_page, first_layer));
    for runs in &pages {
        let (page, layer) = match first.take() {
            Some(first) => first,
            None => doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Report"),
        };
        let layer = doc.get_page(page).get_layer(layer);
        for run in runs {
            let font = if run.bold { &bold } else { &regular };
            layer.use_text(run.text.as_str(), run.size, Mm(run.x), Mm(run.y), font);
        }
    }

    Ok(doc.save_to_bytes()?)
}
