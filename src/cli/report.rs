use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::{bar, money, month_label, truncate};
use crate::reports::{
    budget_recommendation, category_trends, monthly_trend, summary, unusual_spending, MonthTotal,
    Window,
};

use super::{today, Context, WindowArgs};

const BAR_WIDTH: usize = 24;

fn money_cell(val: f64) -> Cell {
    Cell::new(money(val)).set_alignment(CellAlignment::Right)
}

fn window_label(window: Option<&Window>) -> String {
    match window {
        Some(w) => format!("{} to {}", w.start, w.end),
        None => "all time".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

pub fn run_summary(user: Option<String>, window: &WindowArgs, top: Option<usize>) -> Result<()> {
    let ctx = Context::open(user)?;
    let window = window.resolve(today())?;
    let top = top.unwrap_or(ctx.settings.analytics.top_merchants);
    let s = summary(&ctx.conn, &ctx.user, window.as_ref(), top)?;

    println!("{}", format!("Spending summary ({})", window_label(s.window.as_ref())).bold());
    println!("Total:         {}", money(s.total_spent));
    println!("Transactions:  {}", s.transaction_count);
    println!("Per day:       {}", money(s.average_per_day));
    if s.transaction_count == 0 {
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Category", "Total", "Count", "Share"]);
    let total_abs: f64 = s.category_breakdown.iter().map(|c| c.total.abs()).sum();
    for c in &s.category_breakdown {
        let share = if total_abs > 0.0 { c.total.abs() / total_abs * 100.0 } else { 0.0 };
        table.add_row(vec![
            Cell::new(c.category),
            money_cell(c.total),
            Cell::new(c.count),
            Cell::new(format!("{share:.1}%")).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("\nBy category\n{table}");

    let mut table = Table::new();
    table.set_header(vec!["Merchant", "Total", "Count"]);
    for m in &s.top_merchants {
        table.add_row(vec![Cell::new(truncate(&m.merchant, 36)), money_cell(m.total), Cell::new(m.count)]);
    }
    println!("\nTop merchants\n{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

fn trend_table(months: &[MonthTotal]) -> Table {
    let max = months.iter().map(|m| m.total.abs()).fold(0.0, f64::max);
    let mut table = Table::new();
    table.set_header(vec!["Month", "Total", "Count", ""]);
    for m in months {
        table.add_row(vec![
            Cell::new(month_label(m.year, m.month)),
            money_cell(m.total),
            Cell::new(m.count),
            Cell::new(bar(m.total.abs(), max, BAR_WIDTH)),
        ]);
    }
    table
}

pub fn run_trend(user: Option<String>, months: u32, by_category: bool) -> Result<()> {
    let ctx = Context::open(user)?;
    if by_category {
        let trends = category_trends(&ctx.conn, &ctx.user, months, today())?;
        if trends.is_empty() {
            println!("No spending in the last {months} months.");
        }
        for t in &trends {
            println!("{}\n{}\n", t.category.to_string().bold(), trend_table(&t.months));
        }
    } else {
        let rows = monthly_trend(&ctx.conn, &ctx.user, months, today())?;
        println!("Monthly spending\n{}", trend_table(&rows));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unusual
// ---------------------------------------------------------------------------

pub fn run_unusual(
    user: Option<String>,
    window: &WindowArgs,
    k: Option<f64>,
    min_samples: Option<usize>,
) -> Result<()> {
    let ctx = Context::open(user)?;
    let window = window.resolve(today())?;
    let k = k.unwrap_or(ctx.settings.analytics.unusual_k);
    let min_samples = min_samples.unwrap_or(ctx.settings.analytics.unusual_min_samples);
    let flagged = unusual_spending(&ctx.conn, &ctx.user, window.as_ref(), k, min_samples)?;
    if flagged.is_empty() {
        println!("Nothing unusual ({}).", window_label(window.as_ref()));
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Merchant", "Amount", "Category", "Usual", "Why"]);
    for u in &flagged {
        table.add_row(vec![
            Cell::new(u.expense.id),
            Cell::new(u.expense.date),
            Cell::new(truncate(&u.expense.merchant, 28)),
            money_cell(u.expense.amount),
            Cell::new(u.expense.category),
            money_cell(u.category_mean),
            Cell::new(&u.reason),
        ]);
    }
    println!("{}\n{table}", format!("{} unusual expenses", flagged.len()).yellow().bold());
    Ok(())
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

pub fn run_budget(user: Option<String>, months: Option<u32>, shrinkage: Option<f64>) -> Result<()> {
    let ctx = Context::open(user)?;
    let months = months.unwrap_or(ctx.settings.analytics.budget_months);
    let shrinkage = shrinkage.unwrap_or(ctx.settings.analytics.budget_shrinkage);
    let rec = budget_recommendation(&ctx.conn, &ctx.user, months, shrinkage, today())?;

    println!(
        "{}",
        format!("Budget from {} to {} ({} months)", rec.period.start, rec.period.end, rec.months).bold()
    );
    if rec.categories.is_empty() {
        println!("No spending in that period.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Category", "Average", "Last month", "Suggested", ""]);
    for c in &rec.categories {
        let trend = if c.trending_up { "\u{2191} rising".red().to_string() } else { String::new() };
        table.add_row(vec![
            Cell::new(c.category),
            money_cell(c.average),
            money_cell(c.last_month),
            money_cell(c.suggested),
            Cell::new(trend),
        ]);
    }
    println!("{table}");
    println!("Current:   {}", money(rec.total_current));
    println!("Suggested: {}", money(rec.total_suggested));
    println!("Savings:   {}", money(rec.savings_potential).green());
    for tip in &rec.tips {
        println!("  - {tip}");
    }
    Ok(())
}
