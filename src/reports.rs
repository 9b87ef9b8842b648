use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Result, SpendError};
use crate::expenses::{self, ExpenseFilter};
use crate::models::{Category, Expense};

// ---------------------------------------------------------------------------
// Windows and month arithmetic
// ---------------------------------------------------------------------------

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(SpendError::InvalidWindow(format!("{start} is after {end}")));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending on `today`.
    pub fn last_days(days: u32, today: NaiveDate) -> Result<Self> {
        if days == 0 {
            return Err(SpendError::InvalidWindow("window must cover at least one day".to_string()));
        }
        let start = today
            .checked_sub_signed(Duration::days(i64::from(days) - 1))
            .ok_or_else(|| SpendError::InvalidWindow(format!("{days} days before {today} is out of range")))?;
        Self::new(start, today)
    }

    pub fn month(year: i32, month: u32) -> Result<Self> {
        let start = month_start(year, month)?;
        Self::new(start, month_end(year, month)?)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    fn filter(&self) -> ExpenseFilter {
        ExpenseFilter {
            start: Some(self.start),
            end: Some(self.end),
            ..ExpenseFilter::default()
        }
    }
}

fn month_start(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| SpendError::InvalidWindow(format!("no such month: {year}-{month:02}")))
}

fn month_end(year: i32, month: u32) -> Result<NaiveDate> {
    let (ny, nm) = shift_month(year, month, 1);
    Ok(month_start(ny, nm)? - Duration::days(1))
}

/// Longest month range a trend or budget may cover.
const MAX_MONTHS: u32 = 1200;

/// `n` consecutive months ending at (year, month), oldest first.
fn months_ending(n: u32, year: i32, month: u32) -> Result<Vec<(i32, u32)>> {
    if n == 0 {
        return Err(SpendError::InvalidWindow("must cover at least 1 month".to_string()));
    }
    let n = i32::try_from(n)
        .ok()
        .filter(|&n| n as u32 <= MAX_MONTHS)
        .ok_or_else(|| SpendError::InvalidWindow(format!("at most {MAX_MONTHS} months can be covered, got {n}")))?;
    Ok((0..n).rev().map(|back| shift_month(year, month, -back)).collect())
}

/// Moves `delta` calendar months from (year, month).
fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 + delta;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn month_key(year: i32, month: u32) -> String {
    format!("{year:04}-{month:02}")
}

fn window_clause(window: Option<&Window>) -> (String, Vec<String>) {
    match window {
        Some(w) => (
            " AND date BETWEEN ?2 AND ?3".to_string(),
            vec![w.start.to_string(), w.end.to_string()],
        ),
        None => (String::new(), Vec::new()),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTotal {
    pub category: Category,
    pub total: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantTotal {
    pub merchant: String,
    pub total: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// The span the averages were computed over; None when there is no data.
    pub window: Option<Window>,
    pub total_spent: f64,
    pub transaction_count: i64,
    pub average_per_day: f64,
    pub category_breakdown: Vec<CategoryTotal>,
    pub top_merchants: Vec<MerchantTotal>,
}

pub fn summary(conn: &Connection, user: &str, window: Option<&Window>, top_n: usize) -> Result<Summary> {
    let (clause, dates) = window_clause(window);
    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user];
    params.extend(dates.iter().map(|d| d as &dyn rusqlite::types::ToSql));

    let (total, count, first, last): (f64, i64, Option<NaiveDate>, Option<NaiveDate>) = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(amount), 0), COUNT(*), MIN(date), MAX(date) \
             FROM expenses WHERE user_id = ?1{clause}"
        ),
        params.as_slice(),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT category, SUM(amount) AS total, COUNT(*) FROM expenses \
         WHERE user_id = ?1{clause} GROUP BY category ORDER BY ABS(total) DESC, category"
    ))?;
    let category_breakdown = stmt
        .query_map(params.as_slice(), |row| {
            Ok(CategoryTotal {
                category: row.get(0)?,
                total: round2(row.get(1)?),
                count: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT merchant, SUM(amount) AS total, COUNT(*) FROM expenses \
         WHERE user_id = ?1{clause} GROUP BY merchant ORDER BY ABS(total) DESC, merchant LIMIT {top_n}"
    ))?;
    let top_merchants = stmt
        .query_map(params.as_slice(), |row| {
            Ok(MerchantTotal {
                merchant: row.get(0)?,
                total: round2(row.get(1)?),
                count: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let span = match (window, first, last) {
        (Some(w), _, _) => Some(*w),
        (None, Some(first), Some(last)) => Some(Window::new(first, last)?),
        _ => None,
    };
    let average_per_day = match span {
        Some(w) => round2(total / w.days().max(1) as f64),
        None => 0.0,
    };

    Ok(Summary {
        window: span,
        total_spent: round2(total),
        transaction_count: count,
        average_per_day,
        category_breakdown,
        top_merchants,
    })
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub year: i32,
    pub month: u32,
    pub total: f64,
    pub count: i64,
}

impl MonthTotal {
    pub fn key(&self) -> String {
        month_key(self.year, self.month)
    }
}

/// Exactly `months_back` entries ending at today's month; empty months are zero.
pub fn monthly_trend(conn: &Connection, user: &str, months_back: u32, today: NaiveDate) -> Result<Vec<MonthTotal>> {
    let months = months_ending(months_back, today.year(), today.month())?;
    let (fy, fm) = months[0];
    let start = month_start(fy, fm)?;
    let end = month_end(today.year(), today.month())?;

    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', date) AS ym, SUM(amount), COUNT(*) FROM expenses \
         WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3 GROUP BY ym",
    )?;
    let found: BTreeMap<String, (f64, i64)> = stmt
        .query_map(rusqlite::params![user, start, end], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .collect::<std::result::Result<_, _>>()?;

    Ok(months
        .into_iter()
        .map(|(year, month)| {
            let (total, count) = found.get(&month_key(year, month)).copied().unwrap_or((0.0, 0));
            MonthTotal {
                year,
                month,
                total: round2(total),
                count,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTrend {
    pub category: Category,
    pub months: Vec<MonthTotal>,
}

/// Per-category version of `monthly_trend`, for categories with any spending
/// in the range.
pub fn category_trends(conn: &Connection, user: &str, months_back: u32, today: NaiveDate) -> Result<Vec<CategoryTrend>> {
    let months = months_ending(months_back, today.year(), today.month())?;
    let (fy, fm) = months[0];
    let start = month_start(fy, fm)?;
    let end = month_end(today.year(), today.month())?;

    let mut stmt = conn.prepare(
        "SELECT category, strftime('%Y-%m', date) AS ym, SUM(amount), COUNT(*) FROM expenses \
         WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3 GROUP BY category, ym",
    )?;
    let rows: Vec<(Category, String, f64, i64)> = stmt
        .query_map(rusqlite::params![user, start, end], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<_, _>>()?;

    let mut by_category: BTreeMap<Category, BTreeMap<String, (f64, i64)>> = BTreeMap::new();
    for (category, ym, total, count) in rows {
        by_category.entry(category).or_default().insert(ym, (total, count));
    }
    Ok(by_category
        .into_iter()
        .map(|(category, found)| CategoryTrend {
            category,
            months: months
                .iter()
                .map(|&(year, month)| {
                    let (total, count) = found.get(&month_key(year, month)).copied().unwrap_or((0.0, 0));
                    MonthTotal {
                        year,
                        month,
                        total: round2(total),
                        count,
                    }
                })
                .collect(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Unusual spending
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct UnusualExpense {
    pub expense: Expense,
    pub category_mean: f64,
    pub category_stddev: f64,
    /// Standard deviations above the category mean.
    pub deviation: f64,
    pub reason: String,
}

/// Flags expenses whose magnitude exceeds mean + k * stddev of their category.
/// Categories with fewer than `min_samples` expenses or no spread are skipped.
pub fn unusual_spending(
    conn: &Connection,
    user: &str,
    window: Option<&Window>,
    k: f64,
    min_samples: usize,
) -> Result<Vec<UnusualExpense>> {
    let filter = window.map(Window::filter).unwrap_or_default();
    let mut groups: BTreeMap<Category, Vec<Expense>> = BTreeMap::new();
    for e in expenses::list(conn, user, &filter)? {
        groups.entry(e.category).or_default().push(e);
    }

    let mut flagged = Vec::new();
    for (category, group) in groups {
        let n = group.len();
        if n < min_samples.max(2) {
            continue;
        }
        let values: Vec<f64> = group.iter().map(|e| e.amount.abs()).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let sd = variance.sqrt();
        if sd < 1e-9 {
            continue;
        }
        let threshold = mean + k * sd;
        for (expense, value) in group.into_iter().zip(values) {
            if value > threshold {
                let deviation = round2((value - mean) / sd);
                let reason = format!(
                    "{value:.2} is {deviation:.1} standard deviations above the {category} average of {mean:.2}"
                );
                flagged.push(UnusualExpense {
                    expense,
                    category_mean: round2(mean),
                    category_stddev: round2(sd),
                    deviation,
                    reason,
                });
            }
        }
    }
    flagged.sort_by(|a, b| {
        b.deviation
            .total_cmp(&a.deviation)
            .then(a.expense.id.cmp(&b.expense.id))
    });
    Ok(flagged)
}

// ---------------------------------------------------------------------------
// Budget recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBudget {
    pub category: Category,
    pub average: f64,
    pub last_month: f64,
    pub trending_up: bool,
    pub suggested: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetRecommendation {
    pub period: Window,
    pub months: u32,
    pub categories: Vec<CategoryBudget>,
    pub total_current: f64,
    pub total_suggested: f64,
    pub savings_potential: f64,
    pub tips: Vec<String>,
}

/// Budgets from the `trailing_months` complete months before today's month.
/// A category whose last month ran above its earlier average is asked to
/// shrink by `shrinkage`; the rest keep their average.
pub fn budget_recommendation(
    conn: &Connection,
    user: &str,
    trailing_months: u32,
    shrinkage: f64,
    today: NaiveDate,
) -> Result<BudgetRecommendation> {
    let (py, pm) = shift_month(today.year(), today.month(), -1);
    let months = months_ending(trailing_months, py, pm)?;
    let (fy, fm) = months[0];
    let period = Window::new(month_start(fy, fm)?, month_end(py, pm)?)?;

    let mut stmt = conn.prepare(
        "SELECT category, strftime('%Y-%m', date) AS ym, ABS(SUM(amount)) FROM expenses \
         WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3 GROUP BY category, ym",
    )?;
    let rows: Vec<(Category, String, f64)> = stmt
        .query_map(rusqlite::params![user, period.start, period.end], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<_, _>>()?;
    let mut by_category: BTreeMap<Category, BTreeMap<String, f64>> = BTreeMap::new();
    for (category, ym, total) in rows {
        by_category.entry(category).or_default().insert(ym, total);
    }

    let shrinkage = shrinkage.clamp(0.0, 1.0);
    let mut categories = Vec::new();
    for (category, found) in by_category {
        let series: Vec<f64> = months
            .iter()
            .map(|&(y, m)| found.get(&month_key(y, m)).copied().unwrap_or(0.0))
            .collect();
        let average = series.iter().sum::<f64>() / series.len() as f64;
        let last_month = series[series.len() - 1];
        let earlier = &series[..series.len() - 1];
        let trending_up =
            !earlier.is_empty() && last_month > earlier.iter().sum::<f64>() / earlier.len() as f64;
        let suggested = if trending_up { average * (1.0 - shrinkage) } else { average };
        categories.push(CategoryBudget {
            category,
            average: round2(average),
            last_month: round2(last_month),
            trending_up,
            suggested: round2(suggested),
        });
    }
    categories.sort_by(|a, b| b.average.total_cmp(&a.average).then(a.category.cmp(&b.category)));

    let total_current = round2(categories.iter().map(|c| c.average).sum());
    let total_suggested = round2(categories.iter().map(|c| c.suggested).sum());
    let tips = budget_tips(&categories, total_current);
    Ok(BudgetRecommendation {
        period,
        months: trailing_months,
        categories,
        total_current,
        total_suggested,
        savings_potential: round2(total_current - total_suggested),
        tips,
    })
}

fn budget_tips(categories: &[CategoryBudget], monthly_total: f64) -> Vec<String> {
    let mut tips = Vec::new();
    if monthly_total <= 0.0 {
        return tips;
    }
    let share = |wanted: Category| {
        categories
            .iter()
            .find(|c| c.category == wanted)
            .map(|c| c.average / monthly_total)
            .unwrap_or(0.0)
    };
    if share(Category::Food) > 0.30 {
        tips.push("Food is over 30% of your spending. Meal planning could bring it down.".to_string());
    }
    if share(Category::Entertainment) > 0.15 {
        tips.push("Entertainment spending is high. Look for free or low-cost alternatives.".to_string());
    }
    if monthly_total / 30.0 > 100.0 {
        tips.push("Your daily average spending is over 100. Review recurring expenses.".to_string());
    }
    tips
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(SpendError::Other(format!("Unknown export format: {other} (use csv or json)"))),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    date: NaiveDate,
    merchant: &'a str,
    amount: f64,
    category: Category,
    description: &'a str,
    tags: String,
}

/// Serializes the user's expenses, oldest first.
pub fn export(conn: &Connection, user: &str, window: Option<&Window>, format: ExportFormat) -> Result<String> {
    let filter = window.map(Window::filter).unwrap_or_default();
    let mut rows = expenses::list(conn, user, &filter)?;
    rows.reverse();
    let records: Vec<ExportRow> = rows
        .iter()
        .map(|e| ExportRow {
            date: e.date,
            merchant: &e.merchant,
            amount: e.amount,
            category: e.category,
            description: e.description.as_deref().unwrap_or(""),
            tags: e.tags.iter().cloned().collect::<Vec<_>>().join(","),
        })
        .collect();

    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&records)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for record in &records {
                writer.serialize(record)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| SpendError::Other(format!("CSV export failed: {e}")))?;
            String::from_utf8(bytes).map_err(|e| SpendError::Other(format!("CSV export failed: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::db::test_db;
    use crate::expenses::{create_manual, NewExpense};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn add(conn: &Connection, date: NaiveDate, merchant: &str, amount: f64, category: Category) -> i64 {
        create_manual(
            conn,
            "alice",
            &NewExpense {
                date,
                merchant: merchant.to_string(),
                amount,
                category: Some(category),
                description: None,
                tags: BTreeSet::new(),
            },
        )
        .unwrap()
    }

    fn seed(conn: &Connection) {
        add(conn, ymd(2024, 1, 5), "Padaria Real", -10.0, Category::Food);
        add(conn, ymd(2024, 1, 20), "Uber", -25.0, Category::Transport);
        add(conn, ymd(2024, 3, 2), "Padaria Real", -12.0, Category::Food);
        add(conn, ymd(2024, 3, 15), "Ikea", -300.0, Category::Shopping);
        add(conn, ymd(2024, 3, 31), "Uber", -18.5, Category::Transport);
    }

    #[test]
    fn test_window_validation() {
        assert!(Window::new(ymd(2024, 2, 1), ymd(2024, 1, 1)).is_err());
        assert!(Window::last_days(0, ymd(2024, 1, 1)).is_err());
        assert_eq!(Window::last_days(30, ymd(2024, 3, 31)).unwrap().start, ymd(2024, 3, 2));
        assert!(matches!(
            Window::last_days(4_000_000_000, ymd(2024, 3, 31)),
            Err(SpendError::InvalidWindow(_))
        ));
        let feb = Window::month(2024, 2).unwrap();
        assert_eq!(feb.end, ymd(2024, 2, 29));
        assert_eq!(feb.days(), 29);
        assert!(Window::month(2024, 13).is_err());
        assert_eq!(Window::month(2024, 12).unwrap().end, ymd(2024, 12, 31));
    }

    #[test]
    fn test_shift_month_wraps_years() {
        assert_eq!(shift_month(2024, 1, -1), (2023, 12));
        assert_eq!(shift_month(2024, 12, 1), (2025, 1));
        assert_eq!(shift_month(2024, 3, -14), (2023, 1));
    }

    #[test]
    fn test_summary_totals_match_window() {
        let (_dir, conn) = test_db();
        seed(&conn);
        add(&conn, ymd(2024, 1, 9), "Padaria Real", -5.0, Category::Food);
        let march = Window::month(2024, 3).unwrap();
        let s = summary(&conn, "alice", Some(&march), 5).unwrap();
        assert_eq!(s.transaction_count, 3);
        assert_eq!(s.total_spent, -330.5);
        assert_eq!(s.average_per_day, round2(-330.5 / 31.0));
        assert_eq!(s.category_breakdown.len(), 3);
        assert_eq!(s.category_breakdown[0].category, Category::Shopping);
        let merchants: Vec<&str> = s.top_merchants.iter().map(|m| m.merchant.as_str()).collect();
        assert_eq!(merchants, vec!["Ikea", "Uber", "Padaria Real"]);
    }

    #[test]
    fn test_summary_without_window_spans_data() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let s = summary(&conn, "alice", None, 1).unwrap();
        assert_eq!(s.transaction_count, 5);
        assert_eq!(s.total_spent, -365.5);
        let span = s.window.unwrap();
        assert_eq!((span.start, span.end), (ymd(2024, 1, 5), ymd(2024, 3, 31)));
        assert_eq!(s.top_merchants.len(), 1);
        assert_eq!(s.top_merchants[0].merchant, "Ikea");
    }

    #[test]
    fn test_summary_empty() {
        let (_dir, conn) = test_db();
        let s = summary(&conn, "nobody", None, 5).unwrap();
        assert_eq!(s.transaction_count, 0);
        assert_eq!(s.total_spent, 0.0);
        assert_eq!(s.average_per_day, 0.0);
        assert!(s.window.is_none());
        assert!(s.category_breakdown.is_empty());
    }

    #[test]
    fn test_top_merchant_ties_break_by_name() {
        let (_dir, conn) = test_db();
        add(&conn, ymd(2024, 1, 5), "Beta", -10.0, Category::Food);
        add(&conn, ymd(2024, 1, 5), "Alpha", -10.0, Category::Food);
        let s = summary(&conn, "alice", None, 5).unwrap();
        assert_eq!(s.top_merchants[0].merchant, "Alpha");
    }

    #[test]
    fn test_monthly_trend_fills_gaps() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let trend = monthly_trend(&conn, "alice", 3, ymd(2024, 3, 10)).unwrap();
        let keys: Vec<String> = trend.iter().map(|m| m.key()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(trend[0].total, -35.0);
        assert_eq!(trend[1], MonthTotal { year: 2024, month: 2, total: 0.0, count: 0 });
        assert_eq!(trend[2].count, 3);

        let across_year = monthly_trend(&conn, "alice", 4, ymd(2024, 2, 1)).unwrap();
        assert_eq!(across_year[0].key(), "2023-11");
        assert!(monthly_trend(&conn, "alice", 0, ymd(2024, 2, 1)).is_err());
    }

    #[test]
    fn test_huge_month_counts_are_rejected() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let today = ymd(2024, 3, 10);
        for months in [3_000_000_000, MAX_MONTHS + 1] {
            assert!(matches!(
                monthly_trend(&conn, "alice", months, today),
                Err(SpendError::InvalidWindow(_))
            ));
            assert!(matches!(
                category_trends(&conn, "alice", months, today),
                Err(SpendError::InvalidWindow(_))
            ));
            assert!(matches!(
                budget_recommendation(&conn, "alice", months, 0.1, today),
                Err(SpendError::InvalidWindow(_))
            ));
        }
        assert_eq!(monthly_trend(&conn, "alice", MAX_MONTHS, today).unwrap().len(), MAX_MONTHS as usize);
    }

    #[test]
    fn test_category_trends() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let trends = category_trends(&conn, "alice", 3, ymd(2024, 3, 10)).unwrap();
        let food = trends.iter().find(|t| t.category == Category::Food).unwrap();
        let totals: Vec<f64> = food.months.iter().map(|m| m.total).collect();
        assert_eq!(totals, vec![-10.0, 0.0, -12.0]);
        assert!(trends.iter().all(|t| t.months.len() == 3));
    }

    #[test]
    fn test_unusual_spending_flags_outlier() {
        let (_dir, conn) = test_db();
        for (day, amount) in [(1, 10.0), (2, 11.0), (3, 9.0), (4, 10.0), (5, 12.0), (6, 10.0)] {
            add(&conn, ymd(2024, 5, day), "Padaria Real", -amount, Category::Food);
        }
        let big = add(&conn, ymd(2024, 5, 7), "Fancy Dinner", -100.0, Category::Food);
        // Too few samples to judge.
        add(&conn, ymd(2024, 5, 8), "Ikea", -900.0, Category::Shopping);
        add(&conn, ymd(2024, 5, 9), "Zara", -20.0, Category::Shopping);

        let flags = unusual_spending(&conn, "alice", None, 2.0, 3).unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].expense.id, big);
        assert!(flags[0].deviation > 2.0);
        assert!(flags[0].reason.contains("food"));

        let outside = Window::month(2024, 4).unwrap();
        assert!(unusual_spending(&conn, "alice", Some(&outside), 2.0, 3).unwrap().is_empty());
    }

    #[test]
    fn test_unusual_spending_skips_flat_groups() {
        let (_dir, conn) = test_db();
        for day in 1..=5 {
            add(&conn, ymd(2024, 5, day), "Netflix", -39.9, Category::Entertainment);
        }
        assert!(unusual_spending(&conn, "alice", None, 0.0, 3).unwrap().is_empty());
    }

    #[test]
    fn test_budget_recommendation_shrinks_rising_categories() {
        let (_dir, conn) = test_db();
        // Food rises: 100, 100, 160. Transport falls: 60, 50, 40.
        add(&conn, ymd(2024, 1, 10), "Padaria Real", -100.0, Category::Food);
        add(&conn, ymd(2024, 2, 10), "Padaria Real", -100.0, Category::Food);
        add(&conn, ymd(2024, 3, 10), "Padaria Real", -160.0, Category::Food);
        add(&conn, ymd(2024, 1, 11), "Uber", -60.0, Category::Transport);
        add(&conn, ymd(2024, 2, 11), "Uber", -50.0, Category::Transport);
        add(&conn, ymd(2024, 3, 11), "Uber", -40.0, Category::Transport);
        // Current month is excluded.
        add(&conn, ymd(2024, 4, 2), "Ikea", -999.0, Category::Shopping);

        let r = budget_recommendation(&conn, "alice", 3, 0.1, ymd(2024, 4, 15)).unwrap();
        assert_eq!(r.period, Window::new(ymd(2024, 1, 1), ymd(2024, 3, 31)).unwrap());
        assert_eq!(r.categories.len(), 2);

        let food = &r.categories[0];
        assert_eq!(food.category, Category::Food);
        assert_eq!(food.average, 120.0);
        assert!(food.trending_up);
        assert_eq!(food.suggested, 108.0);

        let transport = &r.categories[1];
        assert!(!transport.trending_up);
        assert_eq!(transport.suggested, 50.0);

        assert_eq!(r.total_current, 170.0);
        assert_eq!(r.total_suggested, 158.0);
        assert_eq!(r.savings_potential, 12.0);
        assert!(r.tips.iter().any(|t| t.starts_with("Food")));
    }

    #[test]
    fn test_budget_missing_months_count_as_zero() {
        let (_dir, conn) = test_db();
        add(&conn, ymd(2024, 3, 10), "Netflix", -30.0, Category::Entertainment);
        let r = budget_recommendation(&conn, "alice", 3, 0.1, ymd(2024, 4, 1)).unwrap();
        assert_eq!(r.categories[0].average, 10.0);
        assert!(r.categories[0].trending_up);
        assert_eq!(r.categories[0].suggested, 9.0);
    }

    #[test]
    fn test_export_csv_and_json() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let march = Window::month(2024, 3).unwrap();
        let csv = export(&conn, "alice", Some(&march), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "date,merchant,amount,category,description,tags");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("2024-03-02,Padaria Real,-12.0,food"));

        let json = export(&conn, "alice", None, ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 5);
        assert_eq!(parsed[0]["merchant"], "Padaria Real");
        assert_eq!(parsed[0]["category"], "food");

        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
