use colored::{ColoredString, Colorize};
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::expenses::{self, ExpenseFilter};
use crate::fmt::{money, truncate};
use crate::invoices;
use crate::models::InvoiceStatus;

use super::Context;

fn status_label(status: InvoiceStatus) -> ColoredString {
    match status {
        InvoiceStatus::Pending => "pending".normal(),
        InvoiceStatus::Processing => "processing".yellow(),
        InvoiceStatus::Processed => "processed".green(),
        InvoiceStatus::Failed => "failed".red(),
    }
}

pub fn list(user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let rows = invoices::list(&ctx.conn, &ctx.user)?;
    if rows.is_empty() {
        println!("No uploads yet. Import a CSV with `spendtrack import <file>`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Status", "Rows", "Expenses", "Dupes", "Errors", "Total", "Uploaded"]);
    for inv in &rows {
        table.add_row(vec![
            Cell::new(inv.id),
            Cell::new(truncate(&inv.filename, 32)),
            Cell::new(status_label(inv.status)),
            Cell::new(inv.row_count),
            Cell::new(inv.expense_count),
            Cell::new(inv.duplicate_rows),
            Cell::new(inv.error_rows),
            Cell::new(money(inv.total_amount)).set_alignment(CellAlignment::Right),
            Cell::new(&inv.created_at),
        ]);
    }
    println!("Uploads for {}\n{table}", ctx.user);
    Ok(())
}

pub fn show(id: i64, user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let inv = invoices::get(&ctx.conn, &ctx.user, id)?;

    println!("Invoice {}: {}", inv.id, inv.filename.bold());
    println!("Status:     {}", status_label(inv.status));
    println!("Uploaded:   {}", inv.created_at);
    if inv.status.is_terminal() {
        println!("Finished:   {}", inv.processed_at.as_deref().unwrap_or("-"));
    }
    println!(
        "Rows:       {} ({} expenses, {} duplicates, {} errors)",
        inv.row_count, inv.expense_count, inv.duplicate_rows, inv.error_rows
    );
    println!("Total:      {}", money(inv.total_amount));
    if let Some(message) = &inv.error_message {
        println!("Error:      {}", message.red());
    }

    let filter = ExpenseFilter {
        invoice_id: Some(id),
        ..ExpenseFilter::default()
    };
    let rows = expenses::list(&ctx.conn, &ctx.user, &filter)?;
    if !rows.is_empty() {
        println!();
        println!("{}", super::expenses::expense_table(&rows));
    }
    Ok(())
}

pub fn delete(id: i64, user: Option<String>, force: bool) -> Result<()> {
    let ctx = Context::open(user)?;
    let removed = invoices::delete(&ctx.conn, &ctx.user, id, force)?;
    println!("Deleted invoice {id} and {removed} expenses");
    Ok(())
}
