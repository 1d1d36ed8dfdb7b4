use super::Host;
use super::common::{CommonArgs, Session};
use crate::Result;
use crate::engine::{BudgetSource, RateBudget};
use chrono::{Local, TimeZone};
use clap::Args;
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct BudgetsArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Print the remaining rate-limit budget of every API surface.
pub async fn show_budgets<H: Host>(host: &mut H, args: &BudgetsArgs, cancel: &CancellationToken) -> Result<()> {
    let session = Session::new(&args.common, None)?;
    let budgets = session.client().fetch_budgets(cancel).await?;

    let mut out = host.output();
    for budget in budgets {
        session.governor().record(budget);
        let _ = writeln!(out, "{}", format_budget(&budget, &Local));
    }

    Ok(())
}

fn format_budget<Tz: TimeZone>(budget: &RateBudget, tz: &Tz) -> String
where
    Tz::Offset: core::fmt::Display,
{
    format!(
        "{} {}/{} resets at {}",
        budget.surface,
        budget.remaining,
        budget.limit,
        budget.reset_at.with_timezone(tz).format("%H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Surface;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_format_budget() {
        let budget = RateBudget {
            surface: Surface::GraphQl,
            remaining: 4321,
            limit: 5000,
            reset_at: DateTime::parse_from_rfc3339("2024-05-01T13:45:09Z").unwrap().with_timezone(&Utc),
        };

        assert_eq!(format_budget(&budget, &Utc), "graphql 4321/5000 resets at 13:45:09");
    }
}
