//! Token budget rationing across concurrent tasks.

pub mod allocator;

pub use allocator::{
    BudgetConfig, BudgetStats, Priority, TokenBudgetAllocator, TokenBudgetEntry, UsageRecord,
};
