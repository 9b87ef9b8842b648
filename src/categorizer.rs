use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::{Regex, RegexBuilder};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Semaphore;

use crate::ai::{AiCategorizer, AiRequest};
use crate::error::{AiError, Result, SpendError};
use crate::models::{Category, CategorySource};
use crate::settings::AiSettings;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Contains,
    StartsWith,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::Regex => "regex",
        }
    }
}

impl FromStr for MatchType {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "contains" => Ok(Self::Contains),
            "starts_with" => Ok(Self::StartsWith),
            "regex" => Ok(Self::Regex),
            other => Err(SpendError::InvalidRule(format!(
                "unknown match type {other:?} (expected contains, starts_with or regex)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Contains(String),
    StartsWith(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: i64,
    pub pattern: String,
    pub match_type: MatchType,
    pub category: Category,
    pub priority: i64,
    pub hit_count: i64,
    pub is_active: bool,
    matcher: Matcher,
}

impl Rule {
    pub fn new(
        id: i64,
        pattern: &str,
        match_type: MatchType,
        category: Category,
        priority: i64,
    ) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(SpendError::InvalidRule("pattern is empty".to_string()));
        }
        let matcher = match match_type {
            MatchType::Contains => Matcher::Contains(pattern.to_lowercase()),
            MatchType::StartsWith => Matcher::StartsWith(pattern.to_lowercase()),
            MatchType::Regex => Matcher::Regex(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| SpendError::InvalidRule(format!("{pattern}: {e}")))?,
            ),
        };
        Ok(Self {
            id,
            pattern: pattern.to_string(),
            match_type,
            category,
            priority,
            hit_count: 0,
            is_active: true,
            matcher,
        })
    }

    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Contains(p) => text.to_lowercase().contains(p.as_str()),
            Matcher::StartsWith(p) => text.to_lowercase().starts_with(p.as_str()),
            Matcher::Regex(re) => re.is_match(text),
        }
    }
}

/// Active rules in evaluation order: priority descending, then id.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.retain(|r| r.is_active);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self::new(list_rules(conn)?))
    }

    /// First rule matching the merchant, falling back to the raw description.
    pub fn find(&self, merchant: &str, description: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.matches(merchant))
            .or_else(|| self.rules.iter().find(|r| r.matches(description)))
    }

    /// Up to three categories whose rules match the merchant, most matches first.
    pub fn suggestions(&self, merchant: &str) -> Vec<Category> {
        let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
        for rule in self.rules.iter().filter(|r| r.matches(merchant)) {
            *counts.entry(rule.category).or_default() += 1;
        }
        let mut ranked: Vec<(Category, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(3).map(|(c, _)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT id, pattern, match_type, category, priority, hit_count, is_active \
         FROM rules ORDER BY priority DESC, id",
    )?;
    let rows: Vec<(i64, String, String, String, i64, i64, bool)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut rules = Vec::with_capacity(rows.len());
    for (id, pattern, match_type, category, priority, hit_count, is_active) in rows {
        let built = match_type
            .parse::<MatchType>()
            .and_then(|mt| Rule::new(id, &pattern, mt, category.parse()?, priority));
        match built {
            Ok(mut rule) => {
                rule.hit_count = hit_count;
                rule.is_active = is_active;
                rules.push(rule);
            }
            Err(e) => log::warn!("Skipping rule {id}: {e}"),
        }
    }
    Ok(rules)
}

pub fn add_rule(
    conn: &Connection,
    pattern: &str,
    match_type: MatchType,
    category: Category,
    priority: i64,
) -> Result<i64> {
    Rule::new(0, pattern, match_type, category, priority)?;
    conn.execute(
        "INSERT INTO rules (pattern, match_type, category, priority) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![pattern, match_type.as_str(), category, priority],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Deactivates a rule. Hit counts are kept for the listing.
pub fn delete_rule(conn: &Connection, id: i64) -> Result<()> {
    let active: Option<bool> = conn
        .query_row("SELECT is_active FROM rules WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    match active {
        None => Err(SpendError::Other(format!("No rule with ID {id}"))),
        Some(false) => Err(SpendError::Other(format!("Rule {id} is already inactive"))),
        Some(true) => {
            conn.execute("UPDATE rules SET is_active = 0 WHERE id = ?1", [id])?;
            Ok(())
        }
    }
}

pub fn record_hit(conn: &Connection, rule_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE rules SET hit_count = hit_count + 1 WHERE id = ?1",
        [rule_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Rule { category: Category, rule_id: i64 },
    AiSuggested(Category),
    Default,
}

impl Classification {
    pub fn category(&self) -> Category {
        match self {
            Self::Rule { category, .. } => *category,
            Self::AiSuggested(category) => *category,
            Self::Default => Category::Other,
        }
    }

    pub fn source(&self) -> CategorySource {
        match self {
            Self::Rule { .. } => CategorySource::Rule,
            Self::AiSuggested(_) => CategorySource::Ai,
            Self::Default => CategorySource::Default,
        }
    }

    pub fn rule_id(&self) -> Option<i64> {
        match self {
            Self::Rule { rule_id, .. } => Some(*rule_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub merchant: &'a str,
    pub description: &'a str,
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct AiPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_concurrent: usize,
}

impl Default for AiPolicy {
    fn default() -> Self {
        Self::from(&AiSettings::default())
    }
}

impl From<&AiSettings> for AiPolicy {
    fn from(s: &AiSettings) -> Self {
        Self {
            timeout: s.timeout(),
            max_attempts: s.max_attempts.max(1),
            backoff_base: s.backoff(),
            max_concurrent: s.max_concurrent.max(1),
        }
    }
}

pub struct Classifier<A> {
    rules: RuleSet,
    ai: Option<A>,
    policy: AiPolicy,
    slots: Semaphore,
}

impl<A: AiCategorizer> Classifier<A> {
    pub fn new(rules: RuleSet, ai: Option<A>, policy: AiPolicy) -> Self {
        let slots = Semaphore::new(policy.max_concurrent.max(1));
        Self {
            rules,
            ai,
            policy,
            slots,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    /// Rules first, then the AI service. Never fails: anything the AI cannot
    /// answer falls through to `Default`.
    pub async fn classify(&self, input: &ClassifyInput<'_>) -> Classification {
        if let Some(rule) = self.rules.find(input.merchant, input.description) {
            log::debug!(
                "rule {} ({}) matched {:?} -> {}",
                rule.id,
                rule.pattern,
                input.merchant,
                rule.category
            );
            return Classification::Rule {
                category: rule.category,
                rule_id: rule.id,
            };
        }
        let Some(ai) = &self.ai else {
            return Classification::Default;
        };
        match self.ask_ai(ai, input).await {
            Ok(category) => Classification::AiSuggested(category),
            Err(e) => {
                log::warn!("AI categorization gave up for {:?}: {e}", input.merchant);
                Classification::Default
            }
        }
    }

    /// Classifies every input with at most `max_concurrent` in flight.
    /// Results come back in input order.
    pub async fn classify_all(&self, inputs: &[ClassifyInput<'_>]) -> Vec<Classification> {
        stream::iter(inputs.iter().map(|input| self.classify(input)))
            .buffered(self.policy.max_concurrent.max(1))
            .collect()
            .await
    }

    async fn ask_ai(&self, ai: &A, input: &ClassifyInput<'_>) -> std::result::Result<Category, AiError> {
        let req = AiRequest {
            merchant: input.merchant,
            description: input.description,
            amount: input.amount,
        };
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self.slots.acquire().await.map_err(|_| AiError::Unavailable)?;
                match tokio::time::timeout(self.policy.timeout, ai.suggest(&req)).await {
                    Ok(result) => result,
                    Err(_) => Err(AiError::Timeout(self.policy.timeout)),
                }
            };
            match result {
                Ok(category) => return Ok(category),
                Err(e @ AiError::UnrecognizedLabel(_)) => return Err(e),
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.backoff_base * 2u32.pow((attempt - 1).min(10));
                    log::warn!(
                        "AI attempt {attempt}/{max_attempts} failed for {:?}: {e}; retrying in {delay:?}",
                        input.merchant
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Classifier<crate::ai::OpenAiClient> {
    /// Rule-only classifier; the AI type parameter is never instantiated.
    pub fn rules_only(rules: RuleSet) -> Self {
        Self::new(rules, None, AiPolicy::default())
    }
}
