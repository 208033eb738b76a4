//! Per-task token budget allocation.
//!
//! A session has a finite token pool. Each task asks for an allowance sized
//! by its estimated complexity and priority, reports usage as it goes, and
//! releases the allowance when it finishes. Usage never overdraws an
//! allowance: a report larger than what remains is refused outright.
//!
//! # Example
//!
//! ```rust
//! use tokenwise::budget::{BudgetConfig, Priority, TokenBudgetAllocator};
//!
//! let budget = TokenBudgetAllocator::new(BudgetConfig::default());
//! let granted = budget.allocate("agent-1", "task-1", 9, Priority::Critical);
//! assert_eq!(granted, 8000);
//!
//! assert!(budget.track_usage("task-1", 1500));
//! assert_eq!(budget.get_available("task-1"), 6500);
//! assert_eq!(budget.release("task-1"), 6500);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Highest complexity score that still scales the allowance.
pub const MAX_COMPLEXITY: u8 = 10;

/// Floor for the adaptive base allowance.
const MIN_BASE_ALLOCATION: u64 = 1000;

/// Share of `available` granted when the desired allowance does not fit.
const FALLBACK_SHARE: f64 = 0.8;

/// Task priority. Scales the allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn multiplier(&self) -> f64 {
        match self {
            Priority::Low => 0.5,
            Priority::Normal => 1.0,
            Priority::High => 1.5,
            Priority::Critical => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Token pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total tokens available to the session.
    pub pool: u64,
    /// Allowance for a complexity-0, normal-priority task.
    pub base_allocation: u64,
    /// Extra tokens per complexity point.
    pub complexity_unit: u64,
    /// Ceiling for any single task.
    pub max_per_task: u64,
    /// Fraction of the pool held back from ordinary allocations.
    pub reserve_percentage: f64,
    /// Granted to tasks that report usage before allocating.
    pub emergency_allocation: u64,
    /// Tasks older than this are reclaimed by [`TokenBudgetAllocator::reap_stale`].
    pub task_timeout_secs: u64,
    /// Usage records kept for [`TokenBudgetAllocator::optimize_allocation`].
    pub history_limit: usize,
    /// Trailing window considered when re-sizing the base allowance.
    pub optimize_window: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            pool: 100_000,
            base_allocation: 2000,
            complexity_unit: 1000,
            max_per_task: 8000,
            reserve_percentage: 0.1,
            emergency_allocation: 500,
            task_timeout_secs: 3600,
            history_limit: 1000,
            optimize_window: 100,
        }
    }
}

impl BudgetConfig {
    pub fn reserve(&self) -> u64 {
        (self.pool as f64 * self.reserve_percentage.clamp(0.0, 1.0)).floor() as u64
    }
}

/// One task's allowance. `allocated == used + remaining` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBudgetEntry {
    pub agent_id: String,
    pub task_id: String,
    pub allocated: u64,
    pub used: u64,
    pub remaining: u64,
    pub complexity: u8,
    pub priority: Priority,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Provisioned by a usage report rather than `allocate`.
    pub emergency: bool,
}

/// A successful usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub task_id: String,
    pub tokens: u64,
    pub timestamp: u64,
}

/// Point-in-time view of the allocator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStats {
    pub pool: u64,
    pub reserve: u64,
    pub global_used: u64,
    pub active_tasks: usize,
    pub total_allocated: u64,
    pub total_remaining: u64,
    pub base_allocation: u64,
    pub history_len: usize,
}

#[derive(Debug, Default)]
struct BudgetState {
    entries: HashMap<String, TokenBudgetEntry>,
    global_used: u64,
    history: VecDeque<UsageRecord>,
    base_allocation: u64,
}

/// Rations a token pool across concurrent tasks.
///
/// Thread-safe via a single internal `Mutex` covering entries, the global
/// usage counter and the usage history.
pub struct TokenBudgetAllocator {
    state: Mutex<BudgetState>,
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
}

impl TokenBudgetAllocator {
    pub fn new(config: BudgetConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                base_allocation: config.base_allocation,
                ..Default::default()
            }),
            config,
            clock,
        }
    }

    /// Grant an allowance to `task_id` and return it.
    ///
    /// A task that already holds an allowance gets its current `remaining`
    /// back unchanged.
    pub fn allocate(&self, agent_id: &str, task_id: &str, complexity: u8, priority: Priority) -> u64 {
        let mut state = self.lock();
        if let Some(existing) = state.entries.get(task_id) {
            debug!(task_id, remaining = existing.remaining, "Task already has a budget");
            return existing.remaining;
        }

        let complexity = complexity.min(MAX_COMPLEXITY);
        let desired = self.desired(state.base_allocation, complexity, priority);
        let available = self
            .config
            .pool
            .saturating_sub(state.global_used)
            .saturating_sub(self.config.reserve());

        let granted = if desired <= available {
            desired
        } else {
            let fallback = (available as f64 * FALLBACK_SHARE).floor() as u64;
            let granted = state
                .base_allocation
                .max(fallback)
                .min(self.config.pool.saturating_sub(state.global_used));
            warn!(
                task_id,
                desired,
                available,
                granted,
                "Token pool under pressure, granting reduced budget"
            );
            granted
        };

        state.entries.insert(
            task_id.to_string(),
            TokenBudgetEntry {
                agent_id: agent_id.to_string(),
                task_id: task_id.to_string(),
                allocated: granted,
                used: 0,
                remaining: granted,
                complexity,
                priority,
                created_at: self.clock.now_millis(),
                emergency: false,
            },
        );
        debug!(task_id, agent_id, granted, %priority, complexity, "Allocated token budget");
        granted
    }

    /// Deduct `tokens` from the task's allowance.
    ///
    /// Returns `false` without deducting anything if `tokens` exceeds what
    /// remains. An unknown task first receives a one-off emergency
    /// allowance.
    pub fn track_usage(&self, task_id: &str, tokens: u64) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.lock();

        if !state.entries.contains_key(task_id) {
            let grant = self
                .config
                .emergency_allocation
                .min(self.config.pool.saturating_sub(state.global_used));
            warn!(task_id, grant, "Usage reported for unknown task, provisioning emergency budget");
            state.entries.insert(
                task_id.to_string(),
                TokenBudgetEntry {
                    agent_id: String::new(),
                    task_id: task_id.to_string(),
                    allocated: grant,
                    used: 0,
                    remaining: grant,
                    complexity: 0,
                    priority: Priority::Normal,
                    created_at: now,
                    emergency: true,
                },
            );
        }

        let Some(entry) = state.entries.get_mut(task_id) else {
            return false;
        };
        if entry.remaining < tokens {
            debug!(task_id, tokens, remaining = entry.remaining, "Usage would overdraw budget");
            return false;
        }
        entry.used += tokens;
        entry.remaining -= tokens;

        state.global_used += tokens;
        state.history.push_back(UsageRecord {
            task_id: task_id.to_string(),
            tokens,
            timestamp: now,
        });
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        true
    }

    /// Drop the task's allowance and return the unused remainder.
    ///
    /// The task's `used` amount is taken back out of global usage. Unknown
    /// tasks release nothing.
    pub fn release(&self, task_id: &str) -> u64 {
        let mut state = self.lock();
        let Some(entry) = state.entries.remove(task_id) else {
            return 0;
        };
        state.global_used = state.global_used.saturating_sub(entry.used);
        debug!(task_id, used = entry.used, reclaimed = entry.remaining, "Released token budget");
        entry.remaining
    }

    /// Tokens the task may still spend; 0 for unknown tasks.
    pub fn get_available(&self, task_id: &str) -> u64 {
        self.lock()
            .entries
            .get(task_id)
            .map(|e| e.remaining)
            .unwrap_or(0)
    }

    /// Move the base allowance halfway toward observed per-task usage.
    ///
    /// Averages the trailing `optimize_window` usage records per task and
    /// clamps the result to `[1000, max_per_task]`. Returns the new base.
    pub fn optimize_allocation(&self) -> u64 {
        let mut state = self.lock();
        let window = self.config.optimize_window.max(1);
        let mut per_task: HashMap<&str, u64> = HashMap::new();
        for record in state.history.iter().rev().take(window) {
            *per_task.entry(record.task_id.as_str()).or_insert(0) += record.tokens;
        }
        if per_task.is_empty() {
            return state.base_allocation;
        }
        let average = per_task.values().sum::<u64>() / per_task.len() as u64;
        let current = state.base_allocation;
        let adjusted = if average >= current {
            current + (average - current) / 2
        } else {
            current - (current - average) / 2
        };
        let ceiling = self.config.max_per_task.max(MIN_BASE_ALLOCATION);
        let adjusted = adjusted.clamp(MIN_BASE_ALLOCATION, ceiling);
        if adjusted != current {
            info!(from = current, to = adjusted, average, "Adjusted base token allocation");
        }
        state.base_allocation = adjusted;
        adjusted
    }

    /// Release every task older than `task_timeout_secs`. Returns how many.
    pub fn reap_stale(&self) -> usize {
        let now = self.clock.now_millis();
        let timeout_ms = self.config.task_timeout_secs.saturating_mul(1000);
        let stale: Vec<String> = {
            let state = self.lock();
            state
                .entries
                .values()
                .filter(|e| now.saturating_sub(e.created_at) > timeout_ms)
                .map(|e| e.task_id.clone())
                .collect()
        };
        for task_id in &stale {
            warn!(task_id = %task_id, "Reclaiming budget from timed-out task");
            self.release(task_id);
        }
        stale.len()
    }

    /// The allowance `allocate` would aim for, ignoring pool pressure.
    pub fn plan(&self, complexity: u8, priority: Priority) -> u64 {
        let base = self.lock().base_allocation;
        self.desired(base, complexity.min(MAX_COMPLEXITY), priority)
    }

    pub fn entry(&self, task_id: &str) -> Option<TokenBudgetEntry> {
        self.lock().entries.get(task_id).cloned()
    }

    pub fn stats(&self) -> BudgetStats {
        let state = self.lock();
        BudgetStats {
            pool: self.config.pool,
            reserve: self.config.reserve(),
            global_used: state.global_used,
            active_tasks: state.entries.len(),
            total_allocated: state.entries.values().map(|e| e.allocated).sum(),
            total_remaining: state.entries.values().map(|e| e.remaining).sum(),
            base_allocation: state.base_allocation,
            history_len: state.history.len(),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn desired(&self, base: u64, complexity: u8, priority: Priority) -> u64 {
        let raw = (base + u64::from(complexity) * self.config.complexity_unit) as f64
            * priority.multiplier();
        (raw.floor() as u64).min(self.config.max_per_task)
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenBudgetAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudgetAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
