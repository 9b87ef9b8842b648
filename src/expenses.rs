use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::ai::AiCategorizer;
use crate::categorizer::{record_hit, Classification, Classifier, ClassifyInput};
use crate::error::{Result, SpendError};
use crate::models::{Candidate, Category, CategorySource, DuplicateKey, Expense};

const EXPENSE_COLUMNS: &str = "id, user_id, invoice_id, date, merchant, amount, category, ai_category, \
     category_source, description, tags, created_at, updated_at";

fn expense_from_row(row: &Row) -> rusqlite::Result<Expense> {
    let tags: String = row.get(10)?;
    Ok(Expense {
        id: row.get(0)?,
        user_id: row.get(1)?,
        invoice_id: row.get(2)?,
        date: row.get(3)?,
        merchant: row.get(4)?,
        amount: row.get(5)?,
        category: row.get(6)?,
        ai_category: row.get(7)?,
        category_source: row.get(8)?,
        description: row.get(9)?,
        tags: serde_json::from_str(&tags).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        updated_at: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
    })
}

fn tags_json(tags: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub category: Option<Category>,
    /// Case-insensitive substring of the merchant name.
    pub merchant: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub invoice_id: Option<i64>,
    pub uncategorized_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Newest first.
pub fn list(conn: &Connection, user: &str, filter: &ExpenseFilter) -> Result<Vec<Expense>> {
    let mut clauses = vec!["user_id = ?1".to_string()];
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user.to_string())];

    let mut push = |clause: &str, value: Box<dyn rusqlite::types::ToSql>| {
        params.push(value);
        clauses.push(format!("{clause} ?{}", params.len()));
    };
    if let Some(start) = filter.start {
        push("date >=", Box::new(start));
    }
    if let Some(end) = filter.end {
        push("date <=", Box::new(end));
    }
    if let Some(category) = filter.category {
        push("category =", Box::new(category));
    }
    if let Some(merchant) = &filter.merchant {
        push("merchant LIKE", Box::new(format!("%{merchant}%")));
    }
    if let Some(min) = filter.min_amount {
        push("amount >=", Box::new(min));
    }
    if let Some(max) = filter.max_amount {
        push("amount <=", Box::new(max));
    }
    if let Some(invoice_id) = filter.invoice_id {
        push("invoice_id =", Box::new(invoice_id));
    }
    if filter.uncategorized_only {
        clauses.push("category_source = 'default'".to_string());
    }

    let limit = filter.limit.map(|n| n as i64).unwrap_or(-1);
    let sql = format!(
        "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE {} \
         ORDER BY date DESC, id DESC LIMIT {limit} OFFSET {}",
        clauses.join(" AND "),
        filter.offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_values.as_slice(), expense_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get(conn: &Connection, user: &str, id: i64) -> Result<Expense> {
    conn.query_row(
        &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1 AND user_id = ?2"),
        rusqlite::params![id, user],
        expense_from_row,
    )
    .optional()?
    .ok_or(SpendError::ExpenseNotFound(id))
}

// ---------------------------------------------------------------------------
// Manual CRUD
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub date: NaiveDate,
    pub merchant: String,
    pub amount: f64,
    /// None leaves the expense uncategorized for a later batch run.
    pub category: Option<Category>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

pub fn create_manual(conn: &Connection, user: &str, new: &NewExpense) -> Result<i64> {
    if new.merchant.trim().is_empty() {
        return Err(SpendError::Other("Merchant must not be empty".to_string()));
    }
    let (category, source) = match new.category {
        Some(c) => (c, CategorySource::Manual),
        None => (Category::Other, CategorySource::Default),
    };
    conn.execute(
        "INSERT INTO expenses (user_id, date, merchant, amount, category, category_source, description, tags) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            user,
            new.date,
            new.merchant.trim(),
            round_cents(new.amount),
            category,
            source,
            new.description,
            tags_json(&new.tags)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fields left as None are not touched.
#[derive(Debug, Clone, Default)]
pub struct ExpenseUpdate {
    pub date: Option<NaiveDate>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<Category>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
}

impl ExpenseUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.merchant.is_none()
            && self.amount.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.tags.is_none()
    }
}

/// Applies a partial update. Setting a category marks it as a manual choice;
/// the classifier's own verdict in `ai_category` is kept.
pub fn update(conn: &Connection, user: &str, id: i64, changes: &ExpenseUpdate) -> Result<Expense> {
    let mut expense = get(conn, user, id)?;
    if let Some(date) = changes.date {
        expense.date = date;
    }
    if let Some(merchant) = &changes.merchant {
        if merchant.trim().is_empty() {
            return Err(SpendError::Other("Merchant must not be empty".to_string()));
        }
        expense.merchant = merchant.trim().to_string();
    }
    if let Some(amount) = changes.amount {
        expense.amount = round_cents(amount);
    }
    if let Some(category) = changes.category {
        expense.category = category;
        expense.category_source = CategorySource::Manual;
    }
    if let Some(description) = &changes.description {
        expense.description = Some(description.clone());
    }
    if let Some(tags) = &changes.tags {
        expense.tags = tags.clone();
    }

    conn.execute(
        "UPDATE expenses SET date = ?1, merchant = ?2, amount = ?3, category = ?4, category_source = ?5, \
         description = ?6, tags = ?7, updated_at = datetime('now') WHERE id = ?8",
        rusqlite::params![
            expense.date,
            expense.merchant,
            expense.amount,
            expense.category,
            expense.category_source,
            expense.description,
            tags_json(&expense.tags)?,
            id,
        ],
    )?;
    get(conn, user, id)
}

pub fn delete(conn: &Connection, user: &str, id: i64) -> Result<()> {
    let n = conn.execute(
        "DELETE FROM expenses WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![id, user],
    )?;
    if n == 0 {
        return Err(SpendError::ExpenseNotFound(id));
    }
    Ok(())
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Import helpers
// ---------------------------------------------------------------------------

pub fn is_duplicate(conn: &Connection, user: &str, key: &DuplicateKey) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM expenses WHERE user_id = ?1 AND date = ?2 AND merchant = ?3 \
             AND CAST(ROUND(amount * 100) AS INTEGER) = ?4 LIMIT 1",
            rusqlite::params![user, key.date, key.merchant, key.cents],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_candidate(
    conn: &Connection,
    user: &str,
    invoice_id: i64,
    candidate: &Candidate,
    classification: &Classification,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO expenses (user_id, invoice_id, date, merchant, amount, category, ai_category, \
         category_source, description) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            user,
            invoice_id,
            candidate.date,
            candidate.merchant,
            candidate.amount,
            classification.category(),
            classification.category(),
            classification.source(),
            candidate.description,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes a fresh classifier verdict onto a stored expense.
pub fn apply_classification(conn: &Connection, id: i64, classification: &Classification) -> Result<()> {
    conn.execute(
        "UPDATE expenses SET category = ?1, ai_category = ?2, category_source = ?3, \
         updated_at = datetime('now') WHERE id = ?4",
        rusqlite::params![
            classification.category(),
            classification.category(),
            classification.source(),
            id,
        ],
    )?;
    if let Some(rule_id) = classification.rule_id() {
        record_hit(conn, rule_id)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Re-classification
// ---------------------------------------------------------------------------

fn classify_input(expense: &Expense) -> ClassifyInput<'_> {
    ClassifyInput {
        merchant: &expense.merchant,
        description: expense.description.as_deref().unwrap_or(&expense.merchant),
        amount: expense.amount,
    }
}

/// Re-runs the classifier for one expense, overriding any earlier category.
pub async fn recategorize<A: AiCategorizer>(
    conn: &Connection,
    classifier: &Classifier<A>,
    user: &str,
    id: i64,
) -> Result<Expense> {
    let expense = get(conn, user, id)?;
    let classification = classifier.classify(&classify_input(&expense)).await;
    apply_classification(conn, id, &classification)?;
    log::info!(
        "expense {id}: {} -> {} ({})",
        expense.category,
        classification.category(),
        classification.source()
    );
    get(conn, user, id)
}

// ---------------------------------------------------------------------------
// Merchant suggestions
// ---------------------------------------------------------------------------

/// Merchants seen more often than this give a high-confidence suggestion.
const HIGH_CONFIDENCE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionBasis {
    History,
    Rule,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantHistory {
    pub category: Category,
    pub count: usize,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantSuggestion {
    pub merchant: String,
    /// None when neither history, rules nor the AI could place the merchant.
    pub category: Option<Category>,
    pub confidence: Confidence,
    pub basis: Option<SuggestionBasis>,
    /// Other categories the rules would accept, best first.
    pub alternatives: Vec<Category>,
    /// The user's past expenses at matching merchants, most frequent category first.
    pub history: Vec<MerchantHistory>,
}

/// Suggests a category for a merchant name: the user's most frequent category
/// for matching merchants if there is any history, otherwise the classifier's verdict.
pub async fn suggest_for_merchant<A: AiCategorizer>(
    conn: &Connection,
    classifier: &Classifier<A>,
    user: &str,
    merchant: &str,
) -> Result<MerchantSuggestion> {
    let merchant = merchant.trim();
    if merchant.is_empty() {
        return Err(SpendError::Other("Merchant must not be empty".to_string()));
    }
    let alternatives = classifier.rules().suggestions(merchant);
    let filter = ExpenseFilter {
        merchant: Some(merchant.to_string()),
        ..ExpenseFilter::default()
    };
    let mut groups: BTreeMap<Category, MerchantHistory> = BTreeMap::new();
    for e in list(conn, user, &filter)? {
        let entry = groups.entry(e.category).or_insert(MerchantHistory {
            category: e.category,
            count: 0,
            amount: 0.0,
        });
        entry.count += 1;
        entry.amount = round_cents(entry.amount + e.amount);
    }
    let mut history: Vec<MerchantHistory> = groups.into_values().collect();
    history.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));

    let (category, confidence, basis) = match history.first() {
        Some(top) => {
            let confidence = if top.count > HIGH_CONFIDENCE_COUNT { Confidence::High } else { Confidence::Medium };
            (Some(top.category), confidence, Some(SuggestionBasis::History))
        }
        None => {
            let input = ClassifyInput {
                merchant,
                description: merchant,
                amount: 0.0,
            };
            match classifier.classify(&input).await {
                Classification::Rule { category, .. } => (Some(category), Confidence::Medium, Some(SuggestionBasis::Rule)),
                Classification::AiSuggested(category) => (Some(category), Confidence::Low, Some(SuggestionBasis::Ai)),
                Classification::Default => (None, Confidence::Low, None),
            }
        }
    };
    let alternatives = alternatives.into_iter().filter(|c| Some(*c) != category).collect();
    Ok(MerchantSuggestion {
        merchant: merchant.to_string(),
        category,
        confidence,
        basis,
        alternatives,
        history,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: usize,
    pub changed: usize,
}

/// Re-classifies every expense of the user still filed under OTHER.
pub async fn classify_batch<A: AiCategorizer>(
    conn: &Connection,
    classifier: &Classifier<A>,
    user: &str,
) -> Result<BatchOutcome> {
    let filter = ExpenseFilter {
        category: Some(Category::Other),
        ..ExpenseFilter::default()
    };
    let targets = list(conn, user, &filter)?;
    if targets.is_empty() {
        return Ok(BatchOutcome::default());
    }

    let inputs: Vec<ClassifyInput> = targets.iter().map(classify_input).collect();
    let results = classifier.classify_all(&inputs).await;

    let tx = conn.unchecked_transaction()?;
    let mut outcome = BatchOutcome::default();
    for (expense, classification) in targets.iter().zip(&results) {
        apply_classification(&tx, expense.id, classification)?;
        outcome.processed += 1;
        if classification.category() != Category::Other {
            outcome.changed += 1;
        }
    }
    tx.commit()?;
    log::info!(
        "batch classification for {user}: {} processed, {} changed",
        outcome.processed,
        outcome.changed
    );
    Ok(outcome)
}
