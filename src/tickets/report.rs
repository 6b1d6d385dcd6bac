use chrono::{NaiveDate, NaiveDateTime};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::core::shared::error::{DeskError, DeskResult};
use crate::tickets::store::TicketStore;
use crate::tickets::{ui, Category, TicketId, TicketStatus};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub id: TicketId,
    pub date: NaiveDateTime,
    pub requester: String,
    pub description: String,
    pub status: TicketStatus,
}

/// Inclusive calendar range; `NaiveDate::MIN..=NaiveDate::MAX` means all time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn all_time() -> Self {
        Self {
            start: NaiveDate::MIN,
            end: NaiveDate::MAX,
        }
    }

    pub fn is_all_time(&self) -> bool {
        *self == Self::all_time()
    }

    /// Parses optional `YYYY-MM-DD` bounds; a missing bound is open.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> DeskResult<Self> {
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
                DeskError::Validation(format!("'{raw}' is not a date in YYYY-MM-DD form"))
            })
        };
        let start = start.map(parse).transpose()?.unwrap_or(NaiveDate::MIN);
        let end = end.map(parse).transpose()?.unwrap_or(NaiveDate::MAX);
        if start > end {
            return Err(DeskError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parses the arguments of the `/report` command: zero, one or two dates.
    pub fn parse_args(args: &str) -> DeskResult<Self> {
        let mut parts = args.split_whitespace();
        let start = parts.next();
        let end = parts.next();
        if parts.next().is_some() {
            return Err(DeskError::Validation(
                "usage: /report [YYYY-MM-DD] [YYYY-MM-DD]".into(),
            ));
        }
        Self::parse(start, end)
    }

    pub fn describe(&self) -> String {
        if self.is_all_time() {
            return "all time".to_string();
        }
        let bound = |date: NaiveDate, open: NaiveDate| {
            if date == open {
                "…".to_string()
            } else {
                date.format(DATE_FORMAT).to_string()
            }
        };
        format!(
            "{} – {}",
            bound(self.start, NaiveDate::MIN),
            bound(self.end, NaiveDate::MAX)
        )
    }
}

/// Stateless query over the store; the caller picks the category.
#[derive(Clone)]
pub struct ReportAggregator {
    store: Arc<dyn TicketStore>,
}

impl ReportAggregator {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub fn generate(
        &self,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DeskResult<Vec<ReportRow>> {
        if start > end {
            return Err(DeskError::InvalidRange { start, end });
        }

        let rows = self
            .store
            .list_by_category_and_date_range(category, start, end)?
            .into_iter()
            .map(|ticket| ReportRow {
                id: ticket.id,
                date: ticket.created_at,
                requester: ticket.full_name,
                description: ticket.description,
                status: ticket.status,
            })
            .collect();
        Ok(rows)
    }
}

pub trait ReportRenderer: Send + Sync {
    fn render(&self, rows: &[ReportRow], title: &str) -> DeskResult<Vec<u8>>;

    fn file_extension(&self) -> &'static str;

    fn mime_type(&self) -> &'static str;
}

/// UTF-8 CSV with a byte-order mark so spreadsheet tools pick the right encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportRenderer;

impl ReportRenderer for CsvReportRenderer {
    fn render(&self, rows: &[ReportRow], title: &str) -> DeskResult<Vec<u8>> {
        let render_err = |e: csv::Error| DeskError::Render(e.to_string());

        let mut out = "\u{feff}".as_bytes().to_vec();
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(&mut out);
            writer.write_record([title]).map_err(render_err)?;
            writer
                .write_record(["ID", "Date", "Requester", "Description", "Status"])
                .map_err(render_err)?;
            for row in rows {
                writer
                    .write_record([
                        row.id.to_string(),
                        row.date.format("%Y-%m-%d %H:%M").to_string(),
                        row.requester.clone(),
                        row.description.clone(),
                        row.status.as_str().to_string(),
                    ])
                    .map_err(render_err)?;
            }
            writer
                .flush()
                .map_err(|e| DeskError::Render(e.to_string()))?;
        }
        Ok(out)
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn mime_type(&self) -> &'static str {
        "text/csv"
    }
}

/// Degraded fallback: fixed-width ASCII text, non-ASCII characters replaced by `?`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl PlainTextRenderer {
    const DESCRIPTION_WIDTH: usize = 60;

    fn ascii(text: &str) -> String {
        text.chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .collect()
    }

    pub fn render_text(&self, rows: &[ReportRow], title: &str) -> Vec<u8> {
        let mut out = format!("{}\n\n", Self::ascii(title));
        out.push_str(&format!(
            "{:<6} {:<16} {:<30} {:<12} {}\n",
            "ID", "Date", "Requester", "Status", "Description"
        ));
        for row in rows {
            let description: String = Self::ascii(&row.description)
                .chars()
                .take(Self::DESCRIPTION_WIDTH)
                .collect();
            out.push_str(&format!(
                "{:<6} {:<16} {:<30} {:<12} {}\n",
                row.id,
                row.date.format("%Y-%m-%d %H:%M"),
                Self::ascii(&row.requester),
                row.status.as_str(),
                description
            ));
        }
        if rows.is_empty() {
            out.push_str("(no requests)\n");
        }
        out.into_bytes()
    }
}

impl ReportRenderer for PlainTextRenderer {
    fn render(&self, rows: &[ReportRow], title: &str) -> DeskResult<Vec<u8>> {
        Ok(self.render_text(rows, title))
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn mime_type(&self) -> &'static str {
        "text/plain"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub category: Category,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub rows: usize,
    /// The primary renderer failed and the plain-text fallback was used.
    pub degraded: bool,
}

pub struct ReportService {
    aggregator: ReportAggregator,
    renderer: Arc<dyn ReportRenderer>,
    fallback: PlainTextRenderer,
}

impl ReportService {
    pub fn new(store: Arc<dyn TicketStore>, renderer: Arc<dyn ReportRenderer>) -> Self {
        Self {
            aggregator: ReportAggregator::new(store),
            renderer,
            fallback: PlainTextRenderer,
        }
    }

    pub fn aggregator(&self) -> &ReportAggregator {
        &self.aggregator
    }

    /// One report per category for `range`; rendering problems only degrade the output.
    pub fn run(&self, range: DateRange) -> DeskResult<Vec<RenderedReport>> {
        let mut reports = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let rows = self.aggregator.generate(category, range.start, range.end)?;
            let title = format!(
                "{} requests ({})",
                ui::category_title(category),
                range.describe()
            );
            reports.push(self.render(category, &rows, &title));
        }
        info!(
            "Report for {} generated: {}",
            range.describe(),
            reports
                .iter()
                .map(|r| format!("{}={}", r.category, r.rows))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(reports)
    }

    fn render(&self, category: Category, rows: &[ReportRow], title: &str) -> RenderedReport {
        let (bytes, extension, mime_type, degraded) = match self.renderer.render(rows, title) {
            Ok(bytes) => (
                bytes,
                self.renderer.file_extension(),
                self.renderer.mime_type(),
                false,
            ),
            Err(e) => {
                error!("Report renderer failed for {}: {}", category, e);
                warn!("Falling back to plain-text report for {}", category);
                (
                    self.fallback.render_text(rows, title),
                    self.fallback.file_extension(),
                    self.fallback.mime_type(),
                    true,
                )
            }
        };

        RenderedReport {
            category,
            file_name: format!("{}_report.{}", category, extension),
            mime_type: mime_type.to_string(),
            bytes,
            rows: rows.len(),
            degraded,
        }
    }
}
