use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ai::AiCategorizer;
use crate::categorizer::{record_hit, Classification, Classifier, ClassifyInput};
use crate::error::Result;
use crate::expenses;
use crate::invoices::{self, BatchStats};
use crate::models::{Candidate, InvoiceStatus, RowError};
use crate::normalizer::{self, CsvFormat, Normalized};

/// Row errors quoted in a failed invoice's message.
const QUOTED_ERRORS: usize = 5;

pub fn compute_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub format: CsvFormat,
    /// Fraction of unparseable rows above which the whole batch fails.
    pub max_error_ratio: f64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            format: CsvFormat::default(),
            max_error_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub invoice_id: i64,
    pub filename: String,
    pub status: InvoiceStatus,
    pub imported: usize,
    pub duplicates: usize,
    pub failed_rows: usize,
    pub uncategorized: usize,
    pub total_amount: f64,
    pub row_errors: Vec<RowError>,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// import_upload
// ---------------------------------------------------------------------------

pub async fn import_file<A: AiCategorizer>(
    conn: &Connection,
    classifier: &Classifier<A>,
    options: &ImportOptions,
    user: &str,
    path: &Path,
    today: NaiveDate,
) -> Result<ImportReport> {
    let content = std::fs::read(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    import_upload(conn, classifier, options, user, &filename, &content, today).await
}

/// Runs one upload through normalize, duplicate filtering, classification and
/// persistence, tracking it as an Invoice.
///
/// A rejected batch is not an error: the Invoice is marked failed and the
/// report says why. `Err` means the store itself failed; the Invoice is then
/// left in `processing` with nothing persisted.
pub async fn import_upload<A: AiCategorizer>(
    conn: &Connection,
    classifier: &Classifier<A>,
    options: &ImportOptions,
    user: &str,
    filename: &str,
    content: &[u8],
    today: NaiveDate,
) -> Result<ImportReport> {
    let checksum = compute_checksum(content);
    if let Some(previous) = invoices::find_by_checksum(conn, user, &checksum)? {
        log::info!("{filename:?} has the same content as invoice {previous}; rows will be checked for duplicates");
    }
    let invoice_id = invoices::create(conn, user, filename, Some(&checksum))?;
    invoices::transition(conn, invoice_id, InvoiceStatus::Pending, InvoiceStatus::Processing)?;

    let mut report = ImportReport {
        invoice_id,
        filename: filename.to_string(),
        status: InvoiceStatus::Processing,
        imported: 0,
        duplicates: 0,
        failed_rows: 0,
        uncategorized: 0,
        total_amount: 0.0,
        row_errors: Vec::new(),
        error_message: None,
    };

    let normalized = match normalizer::normalize(content, &options.format, today) {
        Ok(normalized) => normalized,
        Err(e) => {
            fail(conn, &mut report, e.to_string(), &BatchStats::default())?;
            return Ok(report);
        }
    };
    report.failed_rows = normalized.errors.len();
    if let Some(message) = batch_failure(&normalized, options.max_error_ratio) {
        let stats = BatchStats {
            row_count: normalized.total_rows as i64,
            error_rows: normalized.errors.len() as i64,
            ..BatchStats::default()
        };
        report.row_errors = normalized.errors;
        fail(conn, &mut report, message, &stats)?;
        return Ok(report);
    }

    let Normalized {
        candidates,
        errors,
        total_rows,
    } = normalized;
    report.row_errors = errors;

    let mut seen = HashSet::new();
    let mut fresh = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let key = candidate.key();
        if !seen.insert(key.clone()) || expenses::is_duplicate(conn, user, &key)? {
            report.duplicates += 1;
            continue;
        }
        fresh.push(candidate);
    }

    let inputs: Vec<ClassifyInput> = fresh
        .iter()
        .map(|c| ClassifyInput {
            merchant: &c.merchant,
            description: &c.description,
            amount: c.amount,
        })
        .collect();
    let classifications = classifier.classify_all(&inputs).await;

    let mut stats = BatchStats {
        row_count: total_rows as i64,
        error_rows: report.failed_rows as i64,
        ..BatchStats::default()
    };
    if let Err(e) = persist(conn, user, invoice_id, &fresh, &classifications, &mut stats, &mut report) {
        log::error!("invoice {invoice_id}: persisting {filename:?} failed, left in processing: {e}");
        return Err(e);
    }
    report.status = InvoiceStatus::Processed;
    Ok(report)
}

fn fail(conn: &Connection, report: &mut ImportReport, message: String, stats: &BatchStats) -> Result<()> {
    invoices::mark_failed(conn, report.invoice_id, &message, stats)?;
    report.status = InvoiceStatus::Failed;
    report.error_message = Some(message);
    Ok(())
}

/// Why a normalized batch should be rejected as a whole, if it should.
fn batch_failure(normalized: &Normalized, max_error_ratio: f64) -> Option<String> {
    let total = normalized.total_rows;
    if total == 0 {
        return Some("File has no data rows".to_string());
    }
    let failed = normalized.errors.len();
    let ratio = failed as f64 / total as f64;
    if normalized.candidates.is_empty() || ratio > max_error_ratio {
        let reasons: Vec<String> = normalized
            .errors
            .iter()
            .take(QUOTED_ERRORS)
            .map(|e| e.to_string())
            .collect();
        let mut message = format!("{failed} of {total} rows failed: {}", reasons.join("; "));
        if failed > QUOTED_ERRORS {
            message.push_str(&format!("; and {} more", failed - QUOTED_ERRORS));
        }
        return Some(message);
    }
    None
}

/// Inserts the batch and closes the invoice in one write transaction. The
/// duplicate check is repeated here because another upload may have
/// committed the same rows since the pre-filter ran.
fn persist(
    conn: &Connection,
    user: &str,
    invoice_id: i64,
    fresh: &[Candidate],
    classifications: &[Classification],
    stats: &mut BatchStats,
    report: &mut ImportReport,
) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut imported = 0usize;
    let mut late_duplicates = 0usize;
    let mut uncategorized = 0usize;
    let mut total = 0.0;
    for (candidate, classification) in fresh.iter().zip(classifications) {
        if expenses::is_duplicate(&tx, user, &candidate.key())? {
            late_duplicates += 1;
            continue;
        }
        expenses::insert_candidate(&tx, user, invoice_id, candidate, classification)?;
        if let Some(rule_id) = classification.rule_id() {
            record_hit(&tx, rule_id)?;
        }
        if *classification == Classification::Default {
            uncategorized += 1;
        }
        imported += 1;
        total += candidate.amount;
    }
    let total = (total * 100.0).round() / 100.0;

    stats.expense_count = imported as i64;
    stats.duplicate_rows = (report.duplicates + late_duplicates) as i64;
    stats.total_amount = total;
    invoices::mark_processed(&tx, invoice_id, stats)?;
    tx.commit()?;

    report.imported = imported;
    report.duplicates += late_duplicates;
    report.uncategorized = uncategorized;
    report.total_amount = total;
    Ok(())
}
