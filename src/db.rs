use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    checksum TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    processed_at TEXT,
    error_message TEXT,
    row_count INTEGER NOT NULL DEFAULT 0,
    error_rows INTEGER NOT NULL DEFAULT 0,
    duplicate_rows INTEGER NOT NULL DEFAULT 0,
    expense_count INTEGER NOT NULL DEFAULT 0,
    total_amount REAL NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    invoice_id INTEGER,
    date TEXT NOT NULL,
    merchant TEXT NOT NULL,
    amount REAL NOT NULL,
    category TEXT NOT NULL DEFAULT 'other',
    ai_category TEXT,
    category_source TEXT NOT NULL DEFAULT 'default',
    description TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_expenses_identity ON expenses (user_id, date, merchant, amount);
CREATE INDEX IF NOT EXISTS idx_expenses_invoice ON expenses (invoice_id);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    match_type TEXT NOT NULL DEFAULT 'contains',
    category TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    hit_count INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT
);
";

// (pattern, match_type, category, priority)
// Specific patterns outrank the generic ones they contain ("uber eats" over "uber").
pub(crate) const DEFAULT_RULES: &[(&str, &str, &str, i64)] = &[
    // Food
    ("uber eats", "contains", "food", 20),
    ("ifood", "contains", "food", 10),
    ("IFD*", "starts_with", "food", 10),
    ("rappi", "contains", "food", 10),
    ("supermercado", "contains", "food", 5),
    ("supermarket", "contains", "food", 5),
    ("grocery", "contains", "food", 5),
    ("padaria", "contains", "food", 0),
    ("bakery", "contains", "food", 0),
    ("restaurant", "contains", "food", 0),
    ("coffee", "contains", "food", 0),
    ("starbucks", "contains", "food", 0),
    ("pizza", "contains", "food", 0),
    ("burger", "contains", "food", 0),
    ("mcdonald", "contains", "food", 0),
    ("sushi", "contains", "food", 0),
    // Transport
    ("uber", "contains", "transport", 0),
    ("lyft", "contains", "transport", 0),
    ("cabify", "contains", "transport", 0),
    ("taxi", "contains", "transport", 0),
    (r"\b(posto|combustiveis?|gas station)\b", "regex", "transport", 0),
    ("estacionamento", "contains", "transport", 0),
    ("parking", "contains", "transport", 0),
    (r"\b(pedagio|toll)\b", "regex", "transport", 0),
    // Shopping
    ("mercado livre", "contains", "shopping", 20),
    ("mercado pago", "contains", "shopping", 20),
    ("amazon", "contains", "shopping", 5),
    ("shopee", "contains", "shopping", 0),
    ("aliexpress", "contains", "shopping", 0),
    ("ikea", "contains", "shopping", 0),
    ("renner", "contains", "shopping", 0),
    ("zara", "contains", "shopping", 0),
    // Health
    ("farmacia", "contains", "health", 0),
    ("pharmacy", "contains", "health", 0),
    ("drogaria", "contains", "health", 0),
    ("drogasil", "contains", "health", 0),
    ("hospital", "contains", "health", 0),
    ("clinic", "contains", "health", 0),
    ("dental", "contains", "health", 0),
    (r"\b(gym|academia|fitness)\b", "regex", "health", 0),
    // Entertainment
    ("amazon prime", "contains", "entertainment", 15),
    ("netflix", "contains", "entertainment", 0),
    ("spotify", "contains", "entertainment", 0),
    ("disney", "contains", "entertainment", 0),
    ("paramount", "contains", "entertainment", 0),
    ("steam", "contains", "entertainment", 0),
    ("playstation", "contains", "entertainment", 0),
    ("cinema", "contains", "entertainment", 0),
    ("airbnb", "contains", "entertainment", 0),
    ("hotel", "contains", "entertainment", 0),
    // Utilities
    ("google one", "contains", "utilities", 10),
    ("apple.com", "contains", "utilities", 10),
    ("energia", "contains", "utilities", 0),
    ("electric", "contains", "utilities", 0),
    ("sabesp", "contains", "utilities", 0),
    ("comgas", "contains", "utilities", 0),
    ("internet", "contains", "utilities", 0),
    (r"\b(vivo|claro|verizon|comcast)\b", "regex", "utilities", 0),
    ("insurance", "contains", "utilities", 0),
    // Education
    ("udemy", "contains", "education", 0),
    ("coursera", "contains", "education", 0),
    ("alura", "contains", "education", 0),
    (r"\b(school|escola|faculdade|university|tuition)\b", "regex", "education", 0),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    // Concurrent imports queue on the write lock instead of failing with SQLITE_BUSY.
    conn.busy_timeout(Duration::from_secs(10))?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    if get_metadata(conn, "rules_seeded")?.is_none() {
        for (pattern, match_type, category, priority) in DEFAULT_RULES {
            conn.execute(
                "INSERT INTO rules (pattern, match_type, category, priority) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![pattern, match_type, category, priority],
            )?;
        }
        set_metadata(conn, "rules_seeded", "1")?;
        log::info!("Seeded {} default categorization rules", DEFAULT_RULES.len());
    }
    Ok(())
}

pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}
