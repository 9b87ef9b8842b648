use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::SpendError;

/// Stores a string-backed enum as its `as_str()` text and parses it back with `FromStr`.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: SpendError| FromSqlError::Other(Box::new(e)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Transport,
    Shopping,
    Health,
    Entertainment,
    Utilities,
    Education,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Food,
        Category::Transport,
        Category::Shopping,
        Category::Health,
        Category::Entertainment,
        Category::Utilities,
        Category::Education,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Transport => "transport",
            Self::Shopping => "shopping",
            Self::Health => "health",
            Self::Entertainment => "entertainment",
            Self::Utilities => "utilities",
            Self::Education => "education",
            Self::Other => "other",
        }
    }

    /// Lenient mapping for free-text labels such as the AI service's answers.
    pub fn from_label(label: &str) -> Option<Category> {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let category = match cleaned.as_str() {
            "food" | "groceries" | "dining" | "restaurant" | "restaurants" => Self::Food,
            "transport" | "transportation" => Self::Transport,
            "shopping" | "retail" => Self::Shopping,
            "health" | "healthcare" | "medical" => Self::Health,
            "entertainment" | "leisure" => Self::Entertainment,
            "utilities" | "utility" | "bills" => Self::Utilities,
            "education" => Self::Education,
            "other" => Self::Other,
            _ => return None,
        };
        Some(category)
    }
}

impl FromStr for Category {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|c| c.as_str() == wanted)
            .copied()
            .ok_or_else(|| SpendError::UnknownCategory(s.to_string()))
    }
}

sql_text_enum!(Category);

// ---------------------------------------------------------------------------
// CategorySource
// ---------------------------------------------------------------------------

/// Which step produced an expense's current category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Rule,
    Ai,
    /// Classification fell through; the expense counts as uncategorized.
    Default,
    Manual,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Ai => "ai",
            Self::Default => "default",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for CategorySource {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule" => Ok(Self::Rule),
            "ai" => Ok(Self::Ai),
            "default" => Ok(Self::Default),
            "manual" => Ok(Self::Manual),
            other => Err(SpendError::Other(format!("Unknown category source: {other}"))),
        }
    }
}

sql_text_enum!(CategorySource);

// ---------------------------------------------------------------------------
// InvoiceStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Status only moves forward; terminal states accept nothing.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Processed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl FromStr for InvoiceStatus {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(SpendError::Other(format!("Unknown invoice status: {other}"))),
        }
    }
}

sql_text_enum!(InvoiceStatus);

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Expense {
    pub id: i64,
    pub user_id: String,
    pub invoice_id: Option<i64>,
    pub date: NaiveDate,
    pub merchant: String,
    pub amount: f64,
    pub category: Category,
    pub ai_category: Option<Category>,
    pub category_source: CategorySource,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Expense {
    pub fn is_uncategorized(&self) -> bool {
        self.category_source == CategorySource::Default
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: i64,
    pub user_id: String,
    pub filename: String,
    pub checksum: Option<String>,
    pub status: InvoiceStatus,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
    pub row_count: i64,
    pub error_rows: i64,
    pub duplicate_rows: i64,
    pub expense_count: i64,
    pub total_amount: f64,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Normalizer output
// ---------------------------------------------------------------------------

/// A normalized upload row that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub line: u64,
    pub date: NaiveDate,
    pub description: String,
    pub merchant: String,
    pub amount: f64,
}

/// Identity used for duplicate detection: same day, same merchant, same cents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateKey {
    pub date: NaiveDate,
    pub merchant: String,
    pub cents: i64,
}

impl Candidate {
    pub fn key(&self) -> DuplicateKey {
        DuplicateKey {
            date: self.date,
            merchant: self.merchant.clone(),
            cents: (self.amount * 100.0).round() as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub line: u64,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("FOOD".parse::<Category>().unwrap(), Category::Food);
        assert_eq!(" utilities ".parse::<Category>().unwrap(), Category::Utilities);
        assert!(matches!(
            "groceries".parse::<Category>(),
            Err(SpendError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_category_from_label_accepts_synonyms() {
        assert_eq!(Category::from_label("Transportation."), Some(Category::Transport));
        assert_eq!(Category::from_label("\"retail\""), Some(Category::Shopping));
        assert_eq!(Category::from_label("bills"), Some(Category::Utilities));
        assert_eq!(Category::from_label("I think it is food"), None);
    }

    #[test]
    fn test_invoice_status_is_monotonic() {
        use InvoiceStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Processed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Processed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_duplicate_key_uses_cents() {
        let a = Candidate {
            line: 2,
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            description: "UBER TRIP 123".into(),
            merchant: "Uber Trip".into(),
            amount: -15.5,
        };
        let mut b = a.clone();
        b.line = 3;
        b.amount = -15.50000000001;
        assert_eq!(a.key(), b.key());
    }
}
