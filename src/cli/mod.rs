pub mod categorize;
pub mod expenses;
pub mod export;
pub mod import;
pub mod init;
pub mod invoices;
pub mod report;
pub mod rules;
pub mod status;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;

use crate::ai::OpenAiClient;
use crate::categorizer::{AiPolicy, Classifier, RuleSet};
use crate::db::{get_connection, init_db};
use crate::error::{Result, SpendError};
use crate::models::Category;
use crate::normalizer::CsvFormat;
use crate::reports::Window;
use crate::settings::{load_settings, Settings};

// ---------------------------------------------------------------------------
// Shared command context
// ---------------------------------------------------------------------------

pub(crate) struct Context {
    pub settings: Settings,
    pub conn: Connection,
    pub user: String,
}

impl Context {
    /// Loads settings and opens the database; `init` must have run first.
    pub fn open(user: Option<String>) -> Result<Self> {
        let settings = load_settings();
        let db_path = settings.db_path();
        if !db_path.exists() {
            return Err(SpendError::Other(format!(
                "Database not found at {}. Run `spendtrack init` first.",
                db_path.display()
            )));
        }
        let conn = get_connection(&db_path)?;
        init_db(&conn)?;
        let user = user.unwrap_or_else(|| settings.user.clone());
        Ok(Self { settings, conn, user })
    }

    pub fn classifier(&self) -> Result<Classifier<OpenAiClient>> {
        let rules = RuleSet::load(&self.conn)?;
        let ai = OpenAiClient::from_env(&self.settings.ai);
        let classifier = Classifier::new(rules, ai, AiPolicy::from(&self.settings.ai));
        log::info!(
            "classifier ready: {} active rules, AI {}",
            classifier.rules().len(),
            if classifier.has_ai() { "enabled" } else { "disabled" }
        );
        Ok(classifier)
    }
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| SpendError::Other(format!("Invalid date {raw:?} (expected YYYY-MM-DD)")))
}

pub(crate) fn parse_category(raw: &str) -> Result<Category> {
    raw.parse()
}

/// `YYYY-MM` into (year, month).
pub(crate) fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let invalid = || SpendError::InvalidWindow(format!("Invalid month {raw:?} (expected YYYY-MM)"));
    let (y, m) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let year = y.parse().map_err(|_| invalid())?;
    let month = m.parse().map_err(|_| invalid())?;
    Ok((year, month))
}

/// Named CSV presets accepted by `--locale`.
pub(crate) fn locale_format(name: &str) -> Result<CsvFormat> {
    match name.trim().to_lowercase().as_str() {
        "dot" | "us" | "en" => Ok(CsvFormat::default()),
        "comma" | "br" | "eu" => Ok(CsvFormat::comma_locale()),
        other => Err(SpendError::Settings(format!("Unknown locale {other:?} (use dot or comma)"))),
    }
}

/// Date window options shared by listing, report and export commands.
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Month filter: YYYY-MM
    #[arg(long)]
    pub month: Option<String>,
    /// Start date: YYYY-MM-DD
    #[arg(long = "from")]
    pub from_date: Option<String>,
    /// End date: YYYY-MM-DD
    #[arg(long = "to")]
    pub to_date: Option<String>,
    /// Last N days, ending today
    #[arg(long)]
    pub days: Option<u32>,
}

impl WindowArgs {
    pub fn resolve(&self, today: NaiveDate) -> Result<Option<Window>> {
        let given = [
            self.month.is_some(),
            self.from_date.is_some() || self.to_date.is_some(),
            self.days.is_some(),
        ];
        if given.iter().filter(|g| **g).count() > 1 {
            return Err(SpendError::InvalidWindow(
                "use only one of --month, --from/--to or --days".to_string(),
            ));
        }
        if let Some(month) = &self.month {
            let (year, month) = parse_month(month)?;
            return Window::month(year, month).map(Some);
        }
        if let Some(days) = self.days {
            return Window::last_days(days, today).map(Some);
        }
        match (&self.from_date, &self.to_date) {
            (Some(from), Some(to)) => Window::new(parse_date(from)?, parse_date(to)?).map(Some),
            (Some(_), None) => Err(SpendError::InvalidWindow(
                "--from requires --to (both date boundaries must be specified)".to_string(),
            )),
            (None, Some(_)) => Err(SpendError::InvalidWindow(
                "--to requires --from (both date boundaries must be specified)".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Command tree
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "spendtrack",
    version,
    about = "Import bank CSV exports, categorize expenses and report on spending."
)]
pub struct Cli {
    /// User whose data to work on (default: from settings)
    #[arg(long, global = true)]
    pub user: Option<String>,
    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the settings file and database.
    Init {
        /// Where to keep the database (default: platform data dir)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Disable AI categorization
        #[arg(long = "no-ai")]
        no_ai: bool,
        /// CSV number/date style: dot (1,234.56 and MM/DD) or comma (1.234,56 and DD/MM)
        #[arg(long)]
        locale: Option<String>,
    },
    /// Import one or more bank CSV exports.
    Import {
        /// CSV files to import
        #[arg(required = true)]
        files: Vec<String>,
        /// Field delimiter (default from settings)
        #[arg(long)]
        delimiter: Option<char>,
        /// Override the CSV style for this import: dot or comma
        #[arg(long)]
        locale: Option<String>,
    },
    /// Inspect and delete uploaded batches.
    Invoices {
        #[command(subcommand)]
        command: InvoicesCommands,
    },
    /// Inspect and edit expenses.
    Expenses {
        #[command(subcommand)]
        command: ExpensesCommands,
    },
    /// Re-run classification on every expense still filed under other.
    Categorize,
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Spending reports.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Write expenses as CSV or JSON.
    Export {
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: String,
        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Show settings, database location and counts.
    Status,
}

#[derive(Subcommand)]
pub enum InvoicesCommands {
    /// List uploaded batches, newest first.
    List,
    /// Show one batch and its expenses.
    Show { id: i64 },
    /// Delete a batch and all of its expenses.
    Delete {
        id: i64,
        /// Also delete a batch stuck in processing after a failed import
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum ExpensesCommands {
    /// List expenses, newest first.
    List {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        category: Option<String>,
        /// Merchant substring
        #[arg(long)]
        merchant: Option<String>,
        /// Only expenses the classifier could not place
        #[arg(long)]
        uncategorized: bool,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Show one expense.
    Show { id: i64 },
    /// Record an expense by hand.
    Add {
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        merchant: String,
        /// Signed amount; spending is negative
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Change fields of an expense.
    Update {
        id: i64,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<f64>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replaces all tags; repeatable
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,
    },
    /// Delete an expense.
    Delete { id: i64 },
    /// Classify one expense again, overriding its category.
    Recategorize { id: i64 },
    /// Suggest a category for a merchant from past expenses, rules or AI.
    Suggest {
        /// Merchant name or part of it
        merchant: String,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Pattern to match against merchants and descriptions
        pattern: String,
        /// Category to assign
        #[arg(long)]
        category: String,
        /// Match type: contains, starts_with, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Rule priority (higher wins)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i64,
    },
    /// List active rules.
    List,
    /// Deactivate a rule by ID.
    Delete {
        /// Rule ID (shown in `spendtrack rules list`)
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Totals, category breakdown and top merchants.
    Summary {
        #[command(flatten)]
        window: WindowArgs,
        /// Number of merchants to show (default from settings)
        #[arg(long)]
        top: Option<usize>,
    },
    /// Month-by-month totals ending this month.
    Trend {
        #[arg(long, default_value = "6")]
        months: u32,
        /// One table per category
        #[arg(long = "by-category")]
        by_category: bool,
    },
    /// Expenses far above their category's usual amount.
    Unusual {
        #[command(flatten)]
        window: WindowArgs,
        /// Standard deviations above the mean (default from settings)
        #[arg(long)]
        k: Option<f64>,
        #[arg(long = "min-samples")]
        min_samples: Option<usize>,
    },
    /// Monthly budgets from recent complete months.
    Budget {
        #[arg(long)]
        months: Option<u32>,
        /// Cut applied to rising categories, 0.0 to 1.0
        #[arg(long)]
        shrinkage: Option<f64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_args_month() {
        let args = WindowArgs {
            month: Some("2024-02".into()),
            ..Default::default()
        };
        let w = args.resolve(ymd(2024, 6, 1)).unwrap().unwrap();
        assert_eq!((w.start, w.end), (ymd(2024, 2, 1), ymd(2024, 2, 29)));
    }

    #[test]
    fn test_window_args_rejects_half_range_and_mixing() {
        let half = WindowArgs {
            from_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(half.resolve(ymd(2024, 6, 1)).is_err());

        let mixed = WindowArgs {
            month: Some("2024-02".into()),
            days: Some(7),
            ..Default::default()
        };
        assert!(mixed.resolve(ymd(2024, 6, 1)).is_err());
        assert!(WindowArgs::default().resolve(ymd(2024, 6, 1)).unwrap().is_none());
    }

    #[test]
    fn test_locale_format() {
        use crate::normalizer::DecimalSeparator;
        assert_eq!(locale_format("comma").unwrap().decimal, DecimalSeparator::Comma);
        assert_eq!(locale_format("DOT").unwrap().decimal, DecimalSeparator::Dot);
        assert!(locale_format("klingon").is_err());
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("2024-03").unwrap(), (2024, 3));
        assert!(parse_month("March").is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
