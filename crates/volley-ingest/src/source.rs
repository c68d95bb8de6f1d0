//! Source readers: where raw order rows come from.
//!
//! The production reader pulls each configured range through the
//! spreadsheet CSV-export endpoint. Rows arrive untyped; all validation
//! happens in `parse`.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// One raw sheet row, columns B through J. Everything is a string until
/// the parser has had its say; a lenient source is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub price: String,
    pub product: String,
    pub name: String,
    pub alt_code: String,
    pub symbol: String,
    pub execute_date: String,
    pub execute_time: String,
    pub total_quantity: String,
    pub lots: String,
}

impl RawRow {
    /// Build from a CSV record, padding short rows with empty fields.
    pub fn from_record(record: &csv::StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();
        Self {
            price: field(0),
            product: field(1),
            name: field(2),
            alt_code: field(3),
            symbol: field(4),
            execute_date: field(5),
            execute_time: field(6),
            total_quantity: field(7),
            lots: field(8),
        }
    }
}

/// A fetch cycle's worth of rows.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub buy: Vec<RawRow>,
    pub sell: Vec<RawRow>,
}

/// Contract for the ingestion boundary.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Fetch the current buy and sell rows. A failure fails the whole
    /// cycle; the ingester retries from scratch next tick.
    async fn fetch(&self) -> IngestResult<RowBatch>;
}

/// Reader over the spreadsheet CSV-export endpoint.
pub struct SheetsCsvReader {
    http: reqwest::Client,
    document_id: String,
    buy_range: String,
    sell_range: String,
    bearer: Option<String>,
}

impl SheetsCsvReader {
    /// `credentials_path`, when set, names a file holding a bearer token
    /// for documents that are not link-readable.
    pub fn new(
        document_id: impl Into<String>,
        buy_range: impl Into<String>,
        sell_range: impl Into<String>,
        credentials_path: Option<&str>,
    ) -> IngestResult<Self> {
        let bearer = match credentials_path {
            Some(path) if !path.is_empty() => {
                Some(std::fs::read_to_string(path)?.trim().to_string())
            }
            _ => None,
        };
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| IngestError::Source(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            document_id: document_id.into(),
            buy_range: buy_range.into(),
            sell_range: sell_range.into(),
            bearer,
        })
    }

    async fn fetch_range(&self, range: &str) -> IngestResult<Vec<RawRow>> {
        // Ranges use the `sheet!cells` form, e.g. `to_buy!B3:J`.
        let (sheet, cells) = range.split_once('!').unwrap_or(("", range));
        let url = format!(
            "https://docs.google.com/spreadsheets/d/{}/gviz/tq",
            self.document_id
        );

        let mut request = self.http.get(&url).query(&[
            ("tqx", "out:csv"),
            ("sheet", sheet),
            ("range", cells),
        ]);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Source(format!("range {range}: {e}")))?;
        if !response.status().is_success() {
            return Err(IngestError::Source(format!(
                "range {range}: HTTP {}",
                response.status().as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Source(format!("range {range}: {e}")))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(RawRow::from_record(&record?));
        }
        debug!(range, rows = rows.len(), "Fetched sheet range");
        Ok(rows)
    }
}

#[async_trait]
impl SourceReader for SheetsCsvReader {
    async fn fetch(&self) -> IngestResult<RowBatch> {
        let buy = self.fetch_range(&self.buy_range).await?;
        let sell = self.fetch_range(&self.sell_range).await?;
        Ok(RowBatch { buy, sell })
    }
}

/// Canned reader for tests and offline runs.
#[derive(Default)]
pub struct StaticReader {
    batch: Mutex<RowBatch>,
}

impl StaticReader {
    pub fn new(batch: RowBatch) -> Self {
        Self {
            batch: Mutex::new(batch),
        }
    }

    pub fn set(&self, batch: RowBatch) {
        *self.batch.lock() = batch;
    }
}

#[async_trait]
impl SourceReader for StaticReader {
    async fn fetch(&self) -> IngestResult<RowBatch> {
        Ok(self.batch.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_records_pad_with_empty_fields() {
        let record = csv::StringRecord::from(vec!["100.5", "CNC", "Reliance"]);
        let row = RawRow::from_record(&record);
        assert_eq!(row.price, "100.5");
        assert_eq!(row.name, "Reliance");
        assert_eq!(row.symbol, "");
        assert_eq!(row.lots, "");
    }

    #[test]
    fn fields_are_trimmed() {
        let record = csv::StringRecord::from(vec![
            " 100.5 ", "CNC", "Reliance", "500325", " RELIANCE ", "2025-03-10", "09:30", "10", "2",
        ]);
        let row = RawRow::from_record(&record);
        assert_eq!(row.price, "100.5");
        assert_eq!(row.symbol, "RELIANCE");
    }
}
