use std::path::PathBuf;

use colored::Colorize;

use crate::error::Result;
use crate::importer::{import_file, ImportOptions, ImportReport};
use crate::models::InvoiceStatus;

use super::{locale_format, today, Context};

/// Row errors printed per file; the invoice keeps the full count.
const SHOWN_ROW_ERRORS: usize = 10;

pub async fn run(
    files: &[String],
    user: Option<String>,
    delimiter: Option<char>,
    locale: Option<&str>,
) -> Result<()> {
    let ctx = Context::open(user)?;
    let mut format = match locale {
        Some(name) => locale_format(name)?,
        None => ctx.settings.csv.clone(),
    };
    if let Some(d) = delimiter {
        format.delimiter = d;
    }
    let options = ImportOptions {
        format,
        max_error_ratio: ctx.settings.import.max_error_ratio,
    };
    let classifier = ctx.classifier()?;

    for file in files {
        let path = PathBuf::from(file);
        let report = import_file(&ctx.conn, &classifier, &options, &ctx.user, &path, today()).await?;
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ImportReport) {
    let status = match report.status {
        InvoiceStatus::Processed => "processed".green(),
        InvoiceStatus::Failed => "failed".red().bold(),
        other => other.as_str().yellow(),
    };
    println!("{} (invoice {}): {status}", report.filename.bold(), report.invoice_id);
    if let Some(message) = &report.error_message {
        println!("  {}", message.red());
        return;
    }
    println!(
        "  {} imported, {} duplicates, {} failed rows",
        report.imported, report.duplicates, report.failed_rows
    );
    if report.uncategorized > 0 {
        println!(
            "  {} uncategorized (run `spendtrack categorize` to retry)",
            report.uncategorized.to_string().yellow()
        );
    }
    for error in report.row_errors.iter().take(SHOWN_ROW_ERRORS) {
        println!("  {} {error}", "skipped".dimmed());
    }
    if report.row_errors.len() > SHOWN_ROW_ERRORS {
        println!("  ... and {} more", report.row_errors.len() - SHOWN_ROW_ERRORS);
    }
}
