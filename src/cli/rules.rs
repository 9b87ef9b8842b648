use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::{add_rule, delete_rule, list_rules, MatchType};
use crate::error::Result;

use super::{parse_category, Context};

pub fn add(pattern: &str, category: &str, match_type: &str, priority: i64) -> Result<()> {
    let ctx = Context::open(None)?;
    let category = parse_category(category)?;
    let match_type: MatchType = match_type.parse()?;
    let id = add_rule(&ctx.conn, pattern, match_type, category, priority)?;
    println!("Added rule {id}: '{pattern}' \u{2192} {category}");
    Ok(())
}

pub fn list() -> Result<()> {
    let ctx = Context::open(None)?;
    let rules: Vec<_> = list_rules(&ctx.conn)?.into_iter().filter(|r| r.is_active).collect();
    if rules.is_empty() {
        println!("No active rules. Add one with `spendtrack rules add`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Pattern", "Type", "Category", "Priority", "Hits"]);
    for rule in &rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(&rule.pattern),
            Cell::new(rule.match_type.as_str()),
            Cell::new(rule.category),
            Cell::new(rule.priority),
            Cell::new(rule.hit_count),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}

pub fn delete(id: i64) -> Result<()> {
    let ctx = Context::open(None)?;
    delete_rule(&ctx.conn, id)?;
    println!("{} rule {id}", "Deactivated".yellow());
    Ok(())
}
