use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{Result, SpendError};
use crate::models::{Invoice, InvoiceStatus};

const INVOICE_COLUMNS: &str = "id, user_id, filename, checksum, status, processed_at, error_message, \
     row_count, error_rows, duplicate_rows, expense_count, total_amount, created_at";

/// Counters written onto an Invoice when its batch finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub row_count: i64,
    pub error_rows: i64,
    pub duplicate_rows: i64,
    pub expense_count: i64,
    pub total_amount: f64,
}

fn invoice_from_row(row: &Row) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        user_id: row.get(1)?,
        filename: row.get(2)?,
        checksum: row.get(3)?,
        status: row.get(4)?,
        processed_at: row.get(5)?,
        error_message: row.get(6)?,
        row_count: row.get(7)?,
        error_rows: row.get(8)?,
        duplicate_rows: row.get(9)?,
        expense_count: row.get(10)?,
        total_amount: row.get(11)?,
        created_at: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
    })
}

pub fn create(conn: &Connection, user: &str, filename: &str, checksum: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO invoices (user_id, filename, checksum, status) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user, filename, checksum, InvoiceStatus::Pending],
    )?;
    let id = conn.last_insert_rowid();
    log::info!("invoice {id}: created for {filename:?} (user {user})");
    Ok(id)
}

/// Earliest invoice of this user with the same upload checksum, if any.
pub fn find_by_checksum(conn: &Connection, user: &str, checksum: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM invoices WHERE user_id = ?1 AND checksum = ?2 ORDER BY id LIMIT 1",
            [user, checksum],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Another user's invoice is reported as not found.
pub fn get(conn: &Connection, user: &str, id: i64) -> Result<Invoice> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1 AND user_id = ?2"),
        rusqlite::params![id, user],
        invoice_from_row,
    )
    .optional()?
    .ok_or(SpendError::InvoiceNotFound(id))
}

pub fn list(conn: &Connection, user: &str) -> Result<Vec<Invoice>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = ?1 ORDER BY id DESC"
    ))?;
    let invoices = stmt
        .query_map([user], invoice_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(invoices)
}

fn current_status(conn: &Connection, id: i64) -> Result<Option<InvoiceStatus>> {
    let status = conn
        .query_row("SELECT status FROM invoices WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(status)
}

/// Explains why a compare-and-set update touched no row.
fn rejected(conn: &Connection, id: i64, to: InvoiceStatus) -> SpendError {
    match current_status(conn, id) {
        Ok(Some(from)) => SpendError::InvalidTransition { id, from, to },
        Ok(None) => SpendError::InvoiceNotFound(id),
        Err(e) => e,
    }
}

/// Moves an invoice from `from` to `to`, only if it is still in `from`.
pub fn transition(conn: &Connection, id: i64, from: InvoiceStatus, to: InvoiceStatus) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(SpendError::InvalidTransition { id, from, to });
    }
    let n = conn.execute(
        "UPDATE invoices SET status = ?1 WHERE id = ?2 AND status = ?3",
        rusqlite::params![to, id, from],
    )?;
    if n == 0 {
        return Err(rejected(conn, id, to));
    }
    log::info!("invoice {id}: {from} -> {to}");
    Ok(())
}

pub fn mark_processed(conn: &Connection, id: i64, stats: &BatchStats) -> Result<()> {
    let n = conn.execute(
        "UPDATE invoices SET status = ?1, processed_at = datetime('now'), error_message = NULL, \
         row_count = ?2, error_rows = ?3, duplicate_rows = ?4, expense_count = ?5, total_amount = ?6 \
         WHERE id = ?7 AND status = ?8",
        rusqlite::params![
            InvoiceStatus::Processed,
            stats.row_count,
            stats.error_rows,
            stats.duplicate_rows,
            stats.expense_count,
            stats.total_amount,
            id,
            InvoiceStatus::Processing,
        ],
    )?;
    if n == 0 {
        return Err(rejected(conn, id, InvoiceStatus::Processed));
    }
    log::info!(
        "invoice {id}: processing -> processed ({} expenses, {} duplicates, {} row errors)",
        stats.expense_count,
        stats.duplicate_rows,
        stats.error_rows
    );
    Ok(())
}

/// Fails a pending or processing invoice. Failed batches carry no expenses.
pub fn mark_failed(conn: &Connection, id: i64, message: &str, stats: &BatchStats) -> Result<()> {
    let n = conn.execute(
        "UPDATE invoices SET status = ?1, processed_at = datetime('now'), error_message = ?2, \
         row_count = ?3, error_rows = ?4, duplicate_rows = 0, expense_count = 0, total_amount = 0 \
         WHERE id = ?5 AND status IN (?6, ?7)",
        rusqlite::params![
            InvoiceStatus::Failed,
            message,
            stats.row_count,
            stats.error_rows,
            id,
            InvoiceStatus::Pending,
            InvoiceStatus::Processing,
        ],
    )?;
    if n == 0 {
        return Err(rejected(conn, id, InvoiceStatus::Failed));
    }
    log::info!("invoice {id}: -> failed: {message}");
    Ok(())
}

/// Deletes an invoice together with its expenses. Returns how many expenses went with it.
///
/// An invoice still `processing` is refused unless `force` is set; a store
/// failure mid-import leaves it there with nothing persisted.
pub fn delete(conn: &Connection, user: &str, id: i64, force: bool) -> Result<usize> {
    let invoice = get(conn, user, id)?;
    if invoice.status == InvoiceStatus::Processing && !force {
        return Err(SpendError::InvoiceBusy(id));
    }
    let expenses: i64 = conn.query_row(
        "SELECT COUNT(*) FROM expenses WHERE invoice_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    conn.execute(
        "DELETE FROM invoices WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![id, user],
    )?;
    log::info!("invoice {id}: deleted with {expenses} expenses (was {})", invoice.status);
    Ok(expenses as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn stats() -> BatchStats {
        BatchStats {
            row_count: 3,
            error_rows: 1,
            duplicate_rows: 0,
            expense_count: 2,
            total_amount: -23.7,
        }
    }

    #[test]
    fn test_create_starts_pending() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", Some("abc")).unwrap();
        let inv = get(&conn, "alice", id).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert_eq!(inv.filename, "jan.csv");
        assert_eq!(inv.checksum.as_deref(), Some("abc"));
        assert!(inv.processed_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        mark_processed(&conn, id, &stats()).unwrap();
        let inv = get(&conn, "alice", id).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Processed);
        assert_eq!(inv.expense_count, 2);
        assert_eq!(inv.total_amount, -23.7);
        assert!(inv.processed_at.is_some());
    }

    #[test]
    fn test_terminal_invoice_rejects_transitions() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        mark_failed(&conn, id, "bad file", &stats()).unwrap();

        let err = mark_processed(&conn, id, &stats()).unwrap_err();
        assert!(matches!(
            err,
            SpendError::InvalidTransition {
                from: InvoiceStatus::Failed,
                to: InvoiceStatus::Processed,
                ..
            }
        ));
        assert!(mark_failed(&conn, id, "again", &stats()).is_err());
        let inv = get(&conn, "alice", id).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Failed);
        assert_eq!(inv.error_message.as_deref(), Some("bad file"));
        assert_eq!(inv.expense_count, 0);
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        // A second worker racing on the same invoice loses.
        let err = transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap_err();
        assert!(matches!(
            err,
            SpendError::InvalidTransition {
                from: InvoiceStatus::Processing,
                ..
            }
        ));
        assert!(transition(&conn, id, InvoiceStatus::Processing, InvoiceStatus::Pending).is_err());
    }

    #[test]
    fn test_missing_invoice() {
        let (_dir, conn) = test_db();
        assert!(matches!(get(&conn, "alice", 42), Err(SpendError::InvoiceNotFound(42))));
        assert!(matches!(
            transition(&conn, 42, InvoiceStatus::Pending, InvoiceStatus::Processing),
            Err(SpendError::InvoiceNotFound(42))
        ));
    }

    #[test]
    fn test_find_by_checksum_returns_first_upload() {
        let (_dir, conn) = test_db();
        let first = create(&conn, "alice", "a.csv", Some("same")).unwrap();
        create(&conn, "alice", "b.csv", Some("same")).unwrap();
        create(&conn, "bob", "c.csv", Some("other")).unwrap();
        assert_eq!(find_by_checksum(&conn, "alice", "same").unwrap(), Some(first));
        assert_eq!(find_by_checksum(&conn, "bob", "same").unwrap(), None);
    }

    #[test]
    fn test_list_is_per_user_newest_first() {
        let (_dir, conn) = test_db();
        let a = create(&conn, "alice", "a.csv", None).unwrap();
        let b = create(&conn, "alice", "b.csv", None).unwrap();
        create(&conn, "bob", "c.csv", None).unwrap();
        let ids: Vec<i64> = list(&conn, "alice").unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn test_delete_cascades_and_refuses_processing() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        for merchant in ["A", "B"] {
            conn.execute(
                "INSERT INTO expenses (user_id, invoice_id, date, merchant, amount) \
                 VALUES ('alice', ?1, '2024-01-05', ?2, -1.0)",
                rusqlite::params![id, merchant],
            )
            .unwrap();
        }
        assert!(matches!(delete(&conn, "alice", id, false), Err(SpendError::InvoiceBusy(_))));

        mark_processed(&conn, id, &stats()).unwrap();
        assert_eq!(delete(&conn, "alice", id, false).unwrap(), 2);
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 0);
        assert!(matches!(get(&conn, "alice", id), Err(SpendError::InvoiceNotFound(_))));
    }

    fn add_expense(conn: &Connection, user: &str, invoice_id: i64, merchant: &str) {
        conn.execute(
            "INSERT INTO expenses (user_id, invoice_id, date, merchant, amount) \
             VALUES (?1, ?2, '2024-01-05', ?3, -1.0)",
            rusqlite::params![user, invoice_id, merchant],
        )
        .unwrap();
    }

    #[test]
    fn test_get_and_delete_are_scoped_to_user() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        add_expense(&conn, "alice", id, "Padaria");
        mark_processed(&conn, id, &stats()).unwrap();

        assert!(matches!(get(&conn, "bob", id), Err(SpendError::InvoiceNotFound(_))));
        assert!(matches!(delete(&conn, "bob", id, true), Err(SpendError::InvoiceNotFound(_))));

        assert_eq!(get(&conn, "alice", id).unwrap().status, InvoiceStatus::Processed);
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses WHERE user_id = 'alice'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_force_deletes_stuck_processing_invoice() {
        let (_dir, conn) = test_db();
        let id = create(&conn, "alice", "jan.csv", None).unwrap();
        transition(&conn, id, InvoiceStatus::Pending, InvoiceStatus::Processing).unwrap();
        assert!(matches!(delete(&conn, "alice", id, false), Err(SpendError::InvoiceBusy(_))));
        assert_eq!(delete(&conn, "alice", id, true).unwrap(), 0);
        assert!(matches!(get(&conn, "alice", id), Err(SpendError::InvoiceNotFound(_))));
    }
}
