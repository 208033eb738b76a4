//! Budget command handlers.

use anyhow::Result;

use tokenwise::budget::TokenBudgetAllocator;
use tokenwise::Config;

use super::BudgetAction;

/// Handle `tokenwise budget` subcommands.
pub(crate) fn cmd_budget(action: BudgetAction, config: Config) -> Result<()> {
    match action {
        BudgetAction::Plan {
            complexity,
            priority,
        } => {
            let budget = TokenBudgetAllocator::new(config.budget);
            let desired = budget.plan(complexity, priority);
            let granted = budget.allocate("cli", "plan", complexity, priority);
            let cfg = budget.config();
            println!("Complexity:   {}", complexity.min(10));
            println!("Priority:     {} (x{})", priority, priority.multiplier());
            println!("Desired:      {}", desired);
            println!("Granted:      {}", granted);
            println!(
                "Pool:         {} ({} reserved, {} per task max)",
                cfg.pool,
                cfg.reserve(),
                cfg.max_per_task
            );
        }
    }
    Ok(())
}
