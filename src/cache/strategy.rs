//! Named cache strategies and admission.
//!
//! A [`Strategy`] bundles freshness (`max_age_secs`), capacity (`max_size`),
//! matching strictness (`similarity_threshold`) and a list of admission
//! [`Condition`]s. The [`StrategyRegistry`] compiles those conditions once
//! and picks, for each request, the single strategy that owns it. No match
//! means the request is not cached at all.
//!
//! Selection is deterministic: among enabled strategies whose conditions all
//! hold, the highest `priority` wins, and equal priorities go to the one
//! declared first.
//!
//! # Example
//!
//! ```rust
//! use tokenwise::cache::strategy::{RequestFacts, StrategyRegistry};
//!
//! let registry = StrategyRegistry::with_defaults();
//! let facts = RequestFacts::new("list files", "", 1, 12);
//! let strategy = registry.classify(&facts).unwrap();
//! assert_eq!(strategy.id, "simple_commands");
//! ```

use std::collections::{BTreeSet, HashSet, VecDeque};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize::normalize;
use super::request_kind::{self, RequestKind};
use crate::error::{Result, TokenwiseError};

// ---------------------------------------------------------------------------
// Strategy model
// ---------------------------------------------------------------------------

/// Request attribute an admission condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Prompt length in characters.
    ContentLength,
    /// Prompt text.
    Content,
    /// Context text.
    Context,
    /// Detected [`RequestKind`] as its snake_case name.
    RequestType,
    /// Recent lookups of this exact prompt + context.
    AccessFrequency,
    /// UTC hour of day, 0-23.
    HourOfDay,
}

/// Comparison applied between the field and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
}

/// A single admission condition: `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }
}

/// Named cache policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Entries older than this are invisible and get evicted.
    pub max_age_secs: u64,
    /// Live entry cap for this strategy.
    pub max_size: usize,
    /// Minimum similarity for an approximate hit, in `[0, 1]`.
    pub similarity_threshold: f64,
    #[serde(default)]
    pub priority: i32,
    /// All must hold for the strategy to admit a request.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Tags stamped on every entry this strategy creates.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

fn default_enabled() -> bool {
    true
}

/// Built-in strategies used when the config does not declare any.
pub fn default_strategies() -> Vec<Strategy> {
    use ConditionField::*;
    use ConditionOperator::*;
    vec![
        Strategy {
            id: "simple_commands".into(),
            display_name: "Short commands".into(),
            enabled: true,
            max_age_secs: 12 * 3600,
            max_size: 200,
            similarity_threshold: 0.85,
            priority: 0,
            conditions: vec![
                Condition::new(RequestType, Equals, "command"),
                Condition::new(ContentLength, LessThan, 200),
            ],
            tags: ["cmd".to_string()].into_iter().collect(),
        },
        Strategy {
            id: "code_analysis".into(),
            display_name: "Code analysis".into(),
            enabled: true,
            max_age_secs: 24 * 3600,
            max_size: 100,
            similarity_threshold: 0.80,
            priority: 0,
            conditions: vec![Condition::new(RequestType, Equals, "code_analysis")],
            tags: ["code".to_string()].into_iter().collect(),
        },
        Strategy {
            id: "frequent_questions".into(),
            display_name: "Frequent questions".into(),
            enabled: true,
            max_age_secs: 7 * 24 * 3600,
            max_size: 500,
            similarity_threshold: 0.75,
            priority: 0,
            conditions: vec![
                Condition::new(RequestType, Equals, "question"),
                Condition::new(AccessFrequency, GreaterThan, 1),
            ],
            tags: ["question".to_string()].into_iter().collect(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Request facts
// ---------------------------------------------------------------------------

/// Everything admission can look at for one request.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    content: String,
    context: String,
    content_chars: usize,
    kind: RequestKind,
    access_frequency: u32,
    hour_of_day: u32,
}

impl RequestFacts {
    pub fn new(content: &str, context: &str, access_frequency: u32, hour_of_day: u32) -> Self {
        Self {
            content: content.to_lowercase(),
            context: context.to_lowercase(),
            content_chars: content.chars().count(),
            kind: request_kind::detect_normalized(&normalize(content)),
            access_frequency,
            hour_of_day: hour_of_day % 24,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    fn field(&self, field: ConditionField) -> FieldValue<'_> {
        match field {
            ConditionField::ContentLength => FieldValue::Number(self.content_chars as f64),
            ConditionField::Content => FieldValue::Text(&self.content),
            ConditionField::Context => FieldValue::Text(&self.context),
            ConditionField::RequestType => FieldValue::Text(self.kind.as_str()),
            ConditionField::AccessFrequency => FieldValue::Number(f64::from(self.access_frequency)),
            ConditionField::HourOfDay => FieldValue::Number(f64::from(self.hour_of_day)),
        }
    }
}

enum FieldValue<'a> {
    Number(f64),
    Text(&'a str),
}

// ---------------------------------------------------------------------------
// Compiled conditions
// ---------------------------------------------------------------------------

enum CompiledOp {
    EqualsNumber(f64),
    EqualsText(String),
    Contains(String),
    GreaterThan(f64),
    LessThan(f64),
    Regex(Regex),
}

struct CompiledCondition {
    field: ConditionField,
    op: CompiledOp,
}

impl CompiledCondition {
    fn compile(strategy: &str, cond: &Condition) -> Result<Self> {
        let invalid = |reason: String| TokenwiseError::InvalidCondition {
            strategy: strategy.to_string(),
            reason,
        };
        let number = || {
            cond.value.as_f64().ok_or_else(|| {
                invalid(format!(
                    "{:?} on {:?} needs a numeric value, got {}",
                    cond.operator, cond.field, cond.value
                ))
            })
        };
        let op = match cond.operator {
            ConditionOperator::Equals => match &cond.value {
                Value::Number(n) => CompiledOp::EqualsNumber(n.as_f64().unwrap_or_default()),
                Value::String(s) => CompiledOp::EqualsText(s.to_lowercase()),
                Value::Bool(b) => CompiledOp::EqualsText(b.to_string()),
                other => return Err(invalid(format!("cannot compare with {other}"))),
            },
            ConditionOperator::Contains => match &cond.value {
                Value::String(s) => CompiledOp::Contains(s.to_lowercase()),
                other => return Err(invalid(format!("contains needs a string, got {other}"))),
            },
            ConditionOperator::GreaterThan => CompiledOp::GreaterThan(number()?),
            ConditionOperator::LessThan => CompiledOp::LessThan(number()?),
            ConditionOperator::Regex => {
                let pattern = cond
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("regex needs a string pattern".into()))?;
                CompiledOp::Regex(Regex::new(pattern).map_err(|e| invalid(e.to_string()))?)
            }
        };
        Ok(Self {
            field: cond.field,
            op,
        })
    }

    fn matches(&self, facts: &RequestFacts) -> bool {
        let value = facts.field(self.field);
        match (&self.op, value) {
            (CompiledOp::EqualsNumber(n), FieldValue::Number(v)) => (v - n).abs() < f64::EPSILON,
            (CompiledOp::EqualsNumber(n), FieldValue::Text(t)) => {
                t.trim().parse::<f64>().is_ok_and(|v| (v - n).abs() < f64::EPSILON)
            }
            (CompiledOp::EqualsText(s), FieldValue::Text(t)) => t == s,
            (CompiledOp::EqualsText(s), FieldValue::Number(v)) => {
                s.parse::<f64>().is_ok_and(|n| (v - n).abs() < f64::EPSILON)
            }
            (CompiledOp::Contains(s), FieldValue::Text(t)) => t.contains(s.as_str()),
            (CompiledOp::Contains(_), FieldValue::Number(_)) => false,
            (CompiledOp::GreaterThan(n), FieldValue::Number(v)) => v > *n,
            (CompiledOp::LessThan(n), FieldValue::Number(v)) => v < *n,
            (CompiledOp::GreaterThan(_) | CompiledOp::LessThan(_), FieldValue::Text(_)) => false,
            (CompiledOp::Regex(re), FieldValue::Text(t)) => re.is_match(t),
            (CompiledOp::Regex(re), FieldValue::Number(v)) => re.is_match(&v.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validated, compiled set of strategies in declaration order.
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
    compiled: Vec<Vec<CompiledCondition>>,
}

impl StrategyRegistry {
    /// Validate and compile `strategies`.
    ///
    /// Fails on duplicate ids, a zero `max_size`, thresholds outside
    /// `[0, 1]`, and conditions
    /// whose value does not fit the operator (including invalid regexes).
    pub fn new(strategies: Vec<Strategy>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(strategies.len());
        for s in &strategies {
            if s.id.trim().is_empty() {
                return Err(TokenwiseError::Config("strategy id must not be empty".into()));
            }
            if !seen.insert(s.id.as_str()) {
                return Err(TokenwiseError::Config(format!(
                    "duplicate strategy id '{}'",
                    s.id
                )));
            }
            if !(0.0..=1.0).contains(&s.similarity_threshold) {
                return Err(TokenwiseError::Config(format!(
                    "strategy '{}' similarity_threshold {} is outside [0, 1]",
                    s.id, s.similarity_threshold
                )));
            }
            if s.max_size == 0 {
                return Err(TokenwiseError::Config(format!(
                    "strategy '{}' max_size must be at least 1",
                    s.id
                )));
            }
            let conds = s
                .conditions
                .iter()
                .map(|c| CompiledCondition::compile(&s.id, c))
                .collect::<Result<Vec<_>>>()?;
            compiled.push(conds);
        }
        Ok(Self {
            strategies,
            compiled,
        })
    }

    /// Registry of the built-in strategies.
    pub fn with_defaults() -> Self {
        Self::new(default_strategies()).expect("built-in strategies are valid")
    }

    /// Pick the strategy that owns this request, if any.
    pub fn classify(&self, facts: &RequestFacts) -> Option<&Strategy> {
        let mut best: Option<&Strategy> = None;
        for (strategy, conds) in self.strategies.iter().zip(&self.compiled) {
            if !strategy.enabled || !conds.iter().all(|c| c.matches(facts)) {
                continue;
            }
            // Strictly greater keeps the earliest declaration on ties.
            let wins = match best {
                None => true,
                Some(current) => strategy.priority > current.priority,
            };
            if wins {
                best = Some(strategy);
            }
        }
        best
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Access frequency
// ---------------------------------------------------------------------------

/// Timestamps kept per key; older accesses fall off the front.
const MAX_TRACKED_ACCESSES: usize = 256;

/// Sliding-window access counter per exact cache key.
///
/// Sharded so concurrent lookups on different keys do not contend with each
/// other or with the store lock.
#[derive(Debug)]
pub struct AccessTracker {
    window_millis: u64,
    accesses: DashMap<String, VecDeque<u64>>,
}

impl AccessTracker {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_millis: window_secs.saturating_mul(1000),
            accesses: DashMap::new(),
        }
    }

    /// Record an access at `now` and return the count inside the window.
    pub fn record(&self, key: &str, now: u64) -> u32 {
        let mut times = self.accesses.entry(key.to_string()).or_default();
        times.push_back(now);
        while times.len() > MAX_TRACKED_ACCESSES {
            times.pop_front();
        }
        self.trim(&mut times, now);
        times.len() as u32
    }

    /// Accesses of `key` inside the window ending at `now`.
    pub fn count(&self, key: &str, now: u64) -> u32 {
        let floor = now.saturating_sub(self.window_millis);
        self.accesses
            .get(key)
            .map(|times| times.iter().filter(|t| **t >= floor).count() as u32)
            .unwrap_or(0)
    }

    /// Drop keys with no access inside the window. Returns how many were dropped.
    pub fn prune(&self, now: u64) -> usize {
        let floor = now.saturating_sub(self.window_millis);
        let before = self.accesses.len();
        self.accesses
            .retain(|_, times| times.back().is_some_and(|last| *last >= floor));
        before - self.accesses.len()
    }

    pub fn forget(&self, key: &str) {
        self.accesses.remove(key);
    }

    pub fn clear(&self) {
        self.accesses.clear();
    }

    pub fn tracked_keys(&self) -> usize {
        self.accesses.len()
    }

    fn trim(&self, times: &mut VecDeque<u64>, now: u64) {
        let floor = now.saturating_sub(self.window_millis);
        while times.front().is_some_and(|t| *t < floor) {
            times.pop_front();
        }
    }
}
