use std::collections::BTreeSet;

use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Color, Table};

use crate::error::{Result, SpendError};
use crate::expenses::{self, Confidence, ExpenseFilter, ExpenseUpdate, NewExpense};
use crate::fmt::{money, truncate};
use crate::models::{CategorySource, Expense};

use super::{parse_category, parse_date, today, Context, WindowArgs};

pub(crate) fn expense_table(rows: &[Expense]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Merchant", "Amount", "Category", "Source", "Tags"]);
    for e in rows {
        let amount = Cell::new(money(e.amount)).set_alignment(CellAlignment::Right);
        let amount = if e.amount < 0.0 { amount.fg(Color::Red) } else { amount.fg(Color::Green) };
        let category = if e.is_uncategorized() {
            Cell::new(e.category).fg(Color::Yellow)
        } else {
            Cell::new(e.category)
        };
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.date),
            Cell::new(truncate(&e.merchant, 30)),
            amount,
            category,
            Cell::new(e.category_source),
            Cell::new(e.tags.iter().cloned().collect::<Vec<_>>().join(", ")),
        ]);
    }
    table
}

pub fn list(
    user: Option<String>,
    window: &WindowArgs,
    category: Option<&str>,
    merchant: Option<String>,
    uncategorized: bool,
    limit: usize,
) -> Result<()> {
    let ctx = Context::open(user)?;
    let window = window.resolve(today())?;
    let filter = ExpenseFilter {
        start: window.map(|w| w.start),
        end: window.map(|w| w.end),
        category: category.map(parse_category).transpose()?,
        merchant,
        uncategorized_only: uncategorized,
        limit: Some(limit),
        ..ExpenseFilter::default()
    };
    let rows = expenses::list(&ctx.conn, &ctx.user, &filter)?;
    if rows.is_empty() {
        println!("No expenses found.");
        return Ok(());
    }
    println!("{}", expense_table(&rows));
    if rows.len() == limit {
        println!("{}", format!("Showing the first {limit}; use --limit for more.").dimmed());
    }
    Ok(())
}

pub fn show(id: i64, user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let e = expenses::get(&ctx.conn, &ctx.user, id)?;

    println!("Expense {}", e.id);
    println!("Date:        {}", e.date);
    println!("Merchant:    {}", e.merchant);
    println!("Amount:      {}", money(e.amount));
    println!("Category:    {} ({})", e.category, e.category_source);
    if let Some(ai) = e.ai_category {
        println!("AI verdict:  {ai}");
    }
    if let Some(desc) = &e.description {
        println!("Description: {desc}");
    }
    if !e.tags.is_empty() {
        println!("Tags:        {}", e.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    match e.invoice_id {
        Some(inv) => println!("Invoice:     {inv}"),
        None => println!("Invoice:     (entered by hand)"),
    }
    println!("Updated:     {}", e.updated_at);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn add(
    user: Option<String>,
    date: &str,
    merchant: String,
    amount: f64,
    category: Option<&str>,
    description: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let ctx = Context::open(user)?;
    let new = NewExpense {
        date: parse_date(date)?,
        merchant,
        amount,
        category: category.map(parse_category).transpose()?,
        description,
        tags: tags.into_iter().collect(),
    };
    let id = expenses::create_manual(&ctx.conn, &ctx.user, &new)?;
    let saved = expenses::get(&ctx.conn, &ctx.user, id)?;
    println!(
        "Added expense {id}: {} {} \u{2192} {}",
        saved.merchant,
        money(saved.amount),
        saved.category
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn update(
    user: Option<String>,
    id: i64,
    date: Option<&str>,
    merchant: Option<String>,
    amount: Option<f64>,
    category: Option<&str>,
    description: Option<String>,
    tags: Option<Vec<String>>,
) -> Result<()> {
    let ctx = Context::open(user)?;
    let changes = ExpenseUpdate {
        date: date.map(parse_date).transpose()?,
        merchant,
        amount,
        category: category.map(parse_category).transpose()?,
        description,
        tags: tags.map(|t| t.into_iter().collect::<BTreeSet<_>>()),
    };
    if changes.is_empty() {
        return Err(SpendError::Other("Nothing to update; pass at least one field".to_string()));
    }
    let e = expenses::update(&ctx.conn, &ctx.user, id, &changes)?;
    println!(
        "Updated expense {}: {} {} \u{2192} {} ({})",
        e.id,
        e.merchant,
        money(e.amount),
        e.category,
        e.category_source
    );
    Ok(())
}

pub fn delete(id: i64, user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    expenses::delete(&ctx.conn, &ctx.user, id)?;
    println!("Deleted expense {id}");
    Ok(())
}

pub async fn recategorize(id: i64, user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let classifier = ctx.classifier()?;
    let e = expenses::recategorize(&ctx.conn, &classifier, &ctx.user, id).await?;
    let verdict = match e.category_source {
        CategorySource::Default => e.category.to_string().yellow(),
        _ => e.category.to_string().green(),
    };
    println!("Expense {id}: {} \u{2192} {verdict} ({})", e.merchant, e.category_source);
    Ok(())
}

pub async fn suggest(merchant: &str, user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let classifier = ctx.classifier()?;
    let s = expenses::suggest_for_merchant(&ctx.conn, &classifier, &ctx.user, merchant).await?;

    let Some(category) = s.category else {
        println!("No suggestion for {}", s.merchant.bold());
        return Ok(());
    };
    let confidence = match s.confidence {
        Confidence::High => "high".green(),
        Confidence::Medium => "medium".yellow(),
        Confidence::Low => "low".red(),
    };
    let basis = match s.basis {
        Some(expenses::SuggestionBasis::History) => "your past expenses",
        Some(expenses::SuggestionBasis::Rule) => "a categorization rule",
        Some(expenses::SuggestionBasis::Ai) => "AI",
        None => "nothing",
    };
    println!("{} \u{2192} {} ({confidence} confidence, from {basis})", s.merchant.bold(), category.to_string().green());
    if !s.alternatives.is_empty() {
        let names: Vec<String> = s.alternatives.iter().map(|c| c.to_string()).collect();
        println!("Also possible: {}", names.join(", "));
    }
    if !s.history.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Category", "Count", "Amount"]);
        for h in &s.history {
            table.add_row(vec![
                Cell::new(h.category),
                Cell::new(h.count),
                Cell::new(money(h.amount)).set_alignment(CellAlignment::Right),
            ]);
        }
        println!("History\n{table}");
    }
    Ok(())
}
