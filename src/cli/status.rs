use rusqlite::Connection;

use crate::ai::API_KEY_VAR;
use crate::db::get_connection;
use crate::error::Result;
use crate::fmt::{format_bytes, money};
use crate::settings::{load_settings, settings_path};

fn count(conn: &Connection, sql: &str, user: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [user], |r| r.get(0))?)
}

pub fn run(user: Option<String>) -> Result<()> {
    let settings = load_settings();
    let user = user.unwrap_or_else(|| settings.user.clone());
    let db_path = settings.db_path();

    println!("User:       {user}");
    println!("Settings:   {}", settings_path().display());
    println!("Database:   {}", db_path.display());
    let ai = if !settings.ai.enabled {
        "off".to_string()
    } else if std::env::var(API_KEY_VAR).is_ok() {
        format!("{} via {}", settings.ai.model, settings.ai.base_url)
    } else {
        format!("on, but {API_KEY_VAR} is not set")
    };
    println!("AI:         {ai}");

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `spendtrack init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));
    let conn = get_connection(&db_path)?;

    let expenses = count(&conn, "SELECT COUNT(*) FROM expenses WHERE user_id = ?1", &user)?;
    let uncategorized = count(
        &conn,
        "SELECT COUNT(*) FROM expenses WHERE user_id = ?1 AND category = 'other' AND category_source = 'default'",
        &user,
    )?;
    let invoices = count(&conn, "SELECT COUNT(*) FROM invoices WHERE user_id = ?1", &user)?;
    let failed = count(
        &conn,
        "SELECT COUNT(*) FROM invoices WHERE user_id = ?1 AND status = 'failed'",
        &user,
    )?;
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM expenses WHERE user_id = ?1",
        [&user],
        |r| r.get(0),
    )?;
    let rules: i64 = conn.query_row("SELECT COUNT(*) FROM rules WHERE is_active = 1", [], |r| r.get(0))?;

    println!();
    println!("Expenses:       {expenses}");
    println!("Uncategorized:  {uncategorized}");
    println!("Net total:      {}", money(total));
    println!("Uploads:        {invoices} ({failed} failed)");
    println!("Active rules:   {rules}");
    Ok(())
}
