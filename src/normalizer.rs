use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpendError};
use crate::models::{Candidate, RowError};

// ---------------------------------------------------------------------------
// Format configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalSeparator {
    #[default]
    Dot,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

/// Describes how a bank export is laid out. Header names are matched
/// case-insensitively against each alias list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvFormat {
    pub delimiter: char,
    pub date_columns: Vec<String>,
    pub description_columns: Vec<String>,
    pub amount_columns: Vec<String>,
    pub decimal: DecimalSeparator,
    pub date_formats: Vec<String>,
    pub encoding: Encoding,
    pub reject_future_dates: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: ',',
            date_columns: strings(&["date", "data", "posting date", "transaction date"]),
            description_columns: strings(&[
                "description",
                "lançamento",
                "lancamento",
                "merchant",
                "payee",
                "memo",
            ]),
            amount_columns: strings(&["amount", "valor", "value"]),
            decimal: DecimalSeparator::Dot,
            date_formats: strings(&["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"]),
            encoding: Encoding::Utf8,
            reject_future_dates: false,
        }
    }
}

impl CsvFormat {
    /// Exports that write `1.234,56` and day-first dates.
    pub fn comma_locale() -> Self {
        Self {
            decimal: DecimalSeparator::Comma,
            date_formats: strings(&["%d/%m/%Y", "%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y"]),
            ..Self::default()
        }
    }

    fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(SpendError::Settings(format!(
                "CSV delimiter must be an ASCII character, got {:?}",
                self.delimiter
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Normalized {
    pub candidates: Vec<Candidate>,
    pub errors: Vec<RowError>,
    pub total_rows: usize,
}

struct Columns {
    date: usize,
    description: usize,
    amount: usize,
}

/// Parses an uploaded CSV into candidates and per-row errors, in file order.
/// Only a missing header or a missing required column fails the whole file.
pub fn normalize(raw: &[u8], format: &CsvFormat, today: NaiveDate) -> Result<Normalized> {
    let text = decode(raw, format.encoding);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(format.delimiter_byte()?)
        .from_reader(text.as_bytes());

    let headers = rdr.headers()?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(SpendError::EmptyUpload);
    }
    let columns = Columns {
        date: find_column(&headers, &format.date_columns, "date")?,
        description: find_column(&headers, &format.description_columns, "description")?,
        amount: find_column(&headers, &format.amount_columns, "amount")?,
    };

    let mut out = Normalized::default();
    for result in rdr.records() {
        out.total_rows += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                out.errors.push(RowError {
                    line,
                    reason: format!("unreadable row: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        match parse_row(&record, &columns, format, today, line) {
            Ok(candidate) => out.candidates.push(candidate),
            Err(reason) => out.errors.push(RowError { line, reason }),
        }
    }
    log::debug!(
        "normalized {} rows: {} candidates, {} errors",
        out.total_rows,
        out.candidates.len(),
        out.errors.len()
    );
    Ok(out)
}

fn find_column(headers: &csv::StringRecord, aliases: &[String], what: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| {
            let h = h.trim().to_lowercase();
            aliases.iter().any(|a| a.trim().to_lowercase() == h)
        })
        .ok_or_else(|| {
            SpendError::MissingColumn(format!("{what} (expected one of: {})", aliases.join(", ")))
        })
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &Columns,
    format: &CsvFormat,
    today: NaiveDate,
    line: u64,
) -> std::result::Result<Candidate, String> {
    let raw_date = record.get(columns.date).unwrap_or("");
    let date = parse_date(raw_date, &format.date_formats)
        .ok_or_else(|| format!("unparseable date {raw_date:?}"))?;
    if format.reject_future_dates && date > today {
        return Err(format!("date {date} is in the future"));
    }

    let description = record.get(columns.description).unwrap_or("").trim();
    if description.is_empty() {
        return Err("empty description".to_string());
    }

    let raw_amount = record.get(columns.amount).unwrap_or("");
    let amount = parse_amount(raw_amount, format.decimal)
        .ok_or_else(|| format!("unparseable amount {raw_amount:?}"))?;
    if amount == 0.0 {
        return Err("zero amount".to_string());
    }

    Ok(Candidate {
        line,
        date,
        description: description.to_string(),
        merchant: derive_merchant(description),
        amount,
    })
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn decode(raw: &[u8], encoding: Encoding) -> Cow<'_, str> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    match encoding {
        Encoding::Utf8 => match std::str::from_utf8(raw) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => {
                log::warn!("Upload is not valid UTF-8; decoding as Latin-1");
                Cow::Owned(latin1(raw))
            }
        },
        Encoding::Latin1 => Cow::Owned(latin1(raw)),
    }
}

fn latin1(raw: &[u8]) -> String {
    raw.iter().map(|&b| b as char).collect()
}

pub fn parse_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    // Timestamped exports: keep the calendar day.
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Parses a signed money amount, rounded to cents. Handles currency symbols,
/// thousands separators, `(12.00)` and trailing-minus negatives.
pub fn parse_amount(raw: &str, decimal: DecimalSeparator) -> Option<f64> {
    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '"' | '$' | '€' | '£'))
        .collect();

    let mut s = cleaned.as_str();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner;
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    let digits = match decimal {
        DecimalSeparator::Dot => s.replace(',', ""),
        DecimalSeparator::Comma => s.replace('.', "").replace(',', "."),
    };
    if digits.is_empty()
        || digits.matches('.').count() > 1
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        || !digits.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    let value = (value * 100.0).round() / 100.0;
    Some(if negative { -value } else { value })
}

// ---------------------------------------------------------------------------
// Merchant derivation
// ---------------------------------------------------------------------------

const PROCESSOR_PREFIXES: &[&str] = &["IFD*", "MP*", "EC *", "DL *", "PAYPAL *", "SQ *", "TST*", "PG *"];

// (substring of the upper-cased description, display name)
const KNOWN_MERCHANTS: &[(&str, &str)] = &[
    ("AMAZONMKTPLC", "Amazon Marketplace"),
    ("AMAZONPRIMEBR", "Amazon Prime"),
    ("AMAZON BR", "Amazon Brasil"),
    ("MERCADOPAGO", "Mercado Pago"),
    ("MERCADOLIVRE", "Mercado Livre"),
    ("UBER* TRIP", "Uber"),
    ("UBER *TRIP", "Uber"),
    ("MC DONALDS", "McDonald's"),
    ("CLAUDE.AI SUBSCRIPTION", "Claude AI"),
    ("APPLE.COM/BILL", "Apple"),
    ("PARAMOUNT+", "Paramount Plus"),
    ("GOOGLE ONE", "Google One"),
];

static INSTALLMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}/\d{1,2}$").unwrap());
static LABELLED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(REF|ID|TXN|AUTH|NSU)[:#-]?\S*\d\S*$").unwrap());
static LONG_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{8,}$").unwrap());

fn is_noise_token(token: &str) -> bool {
    if token.starts_with('#') || INSTALLMENT.is_match(token) || LABELLED_ID.is_match(token) {
        return true;
    }
    let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
    if digits == token.len() && digits >= 4 {
        return true;
    }
    LONG_CODE.is_match(token) && digits >= 3
}

/// Short display name for a raw bank description: processor prefixes,
/// transaction ids, installment markers and trailing codes are dropped.
pub fn derive_merchant(description: &str) -> String {
    let trimmed = description.trim();
    let upper = trimmed.to_uppercase();
    for (pattern, name) in KNOWN_MERCHANTS {
        if upper.contains(pattern) {
            return name.to_string();
        }
    }

    let mut rest = trimmed;
    for prefix in PROCESSOR_PREFIXES {
        if upper.starts_with(prefix) {
            rest = rest[prefix.len()..].trim_start();
            break;
        }
    }

    let mut tokens: Vec<&str> = rest
        .split_whitespace()
        .filter(|t| !is_noise_token(t))
        .collect();
    while let Some(last) = tokens.last() {
        let code = last.trim_matches(|c: char| matches!(c, '*' | '-' | '.' | ','));
        if code.is_empty() || code.chars().all(|c| c.is_ascii_digit()) {
            tokens.pop();
        } else {
            break;
        }
    }

    if tokens.is_empty() {
        return trimmed.to_string();
    }
    title_case(&tokens.join(" "))
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
