use super::tax::round_money;
use super::types::{
    AccountBalance, NetWorthCheckpoint, Phase, PhaseCashFlow, Plan, SimulationSummary, YearResult,
};

pub const FIRST_CHECKPOINT_AGE: u32 = 45;
pub const LAST_CHECKPOINT_AGE: u32 = 90;
pub const CHECKPOINT_STEP: usize = 5;

/// Reduces a year sequence into headline figures.
pub fn summarize(plan: &Plan, years: &[YearResult]) -> SimulationSummary {
    let first_failure_age = years.iter().find(|y| y.status.is_fail()).map(|y| y.age);
    let bear_first_failure_age = years.iter().find(|y| y.bear.status.is_fail()).map(|y| y.age);
    let bull_first_failure_age = years.iter().find(|y| y.bull.status.is_fail()).map(|y| y.age);

    let checkpoints = (FIRST_CHECKPOINT_AGE..=LAST_CHECKPOINT_AGE)
        .step_by(CHECKPOINT_STEP)
        .filter_map(|age| years.iter().find(|y| y.age == age))
        .map(|y| NetWorthCheckpoint {
            age: y.age,
            net_worth: y.net_worth,
            bear_net_worth: y.bear.net_worth,
            bull_net_worth: y.bull.net_worth,
        })
        .collect();

    let last_working = years.iter().rev().find(|y| y.phase == Phase::Working);
    let (net_worth_at_retirement, retirement_balances) = match last_working {
        Some(year) => (year.net_worth, year.balances.clone()),
        None => opening_position(plan),
    };

    let reference_age = plan
        .goal
        .reference_age
        .unwrap_or(plan.personal.retirement_age);
    let net_worth_at_reference_age = years
        .iter()
        .find(|y| y.age == reference_age)
        .map(|y| y.net_worth)
        .unwrap_or(0.0);

    let (peak_net_worth, peak_net_worth_age) = years.iter().fold(
        (f64::NEG_INFINITY, plan.personal.current_age),
        |(best, best_age), y| {
            if y.net_worth > best {
                (y.net_worth, y.age)
            } else {
                (best, best_age)
            }
        },
    );

    let mut working = PhaseCashFlow::default();
    let mut retirement = PhaseCashFlow::default();
    for year in years {
        let phase = match year.phase {
            Phase::Working => &mut working,
            Phase::Retired => &mut retirement,
        };
        phase.years += 1;
        phase.income += year.income.total;
        phase.taxes += year.taxes.total;
        phase.expenses += year.expenses.total;
        phase.contributions += year.contributions;
        phase.net_cash_flow += year.net_cash_flow;
    }

    let total_income = working.income + retirement.income;
    let total_taxes = working.taxes + retirement.taxes;
    let effective_tax_rate = if total_income > 0.0 {
        total_taxes / total_income
    } else {
        0.0
    };

    SimulationSummary {
        first_failure_age,
        bear_first_failure_age,
        bull_first_failure_age,
        checkpoints,
        net_worth_at_retirement,
        net_worth_at_reference_age,
        terminal_net_worth: years.last().map(|y| y.net_worth).unwrap_or(0.0),
        peak_net_worth: if years.is_empty() { 0.0 } else { peak_net_worth },
        peak_net_worth_age,
        total_taxes: round_money(total_taxes),
        total_income: round_money(total_income),
        total_expenses: round_money(working.expenses + retirement.expenses),
        total_social_security: round_money(years.iter().map(|y| y.income.social_security).sum()),
        total_withdrawals: round_money(years.iter().map(|y| y.effects.withdrawal).sum()),
        total_unmet_shortfall: round_money(years.iter().map(|y| y.unmet_shortfall).sum()),
        effective_tax_rate,
        working,
        retirement,
        retirement_balances,
    }
}

/// Balances before the first simulated year, for plans that start retired.
fn opening_position(plan: &Plan) -> (f64, Vec<AccountBalance>) {
    let balances: Vec<AccountBalance> = plan
        .accounts
        .iter()
        .map(|a| AccountBalance {
            id: a.id.clone(),
            kind: a.kind,
            balance: round_money(a.balance.max(0.0)),
        })
        .collect();
    let total = round_money(plan.accounts.iter().map(|a| a.balance.max(0.0)).sum());
    (total, balances)
}
