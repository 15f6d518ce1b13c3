use serde::Serialize;

use super::engine::simulate;
use super::error::PlanError;
use super::types::{AccountKind, ContributionPreference, Plan};

/// Per-account caps used when a preference fills one account kind before the next.
const TAX_DEFERRED_FILL: f64 = 23_500.0;
const TAX_FREE_FILL: f64 = 7_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveConfig {
    pub target_net_worth: f64,
    pub reference_age: u32,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub preference: ContributionPreference,
}

impl GoalSolveConfig {
    pub fn from_plan(plan: &Plan) -> Result<Self, PlanError> {
        let goal = &plan.goal;
        let income = plan.income.wages + plan.income.secondary_income;
        let config = Self {
            target_net_worth: goal.target_net_worth,
            reference_age: goal.reference_age.unwrap_or(plan.personal.retirement_age),
            search_min: 0.0,
            search_max: goal.max_income_multiple * income,
            tolerance: goal.tolerance,
            max_iterations: goal.max_iterations,
            preference: goal.preference,
        };
        validate_config(plan, &config)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub net_worth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionShare {
    pub account_id: String,
    pub kind: AccountKind,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolution {
    pub target_net_worth: f64,
    pub reference_age: u32,
    pub required_contribution: f64,
    pub allocation: Vec<ContributionShare>,
    pub achieved_net_worth: f64,
    pub search_max: f64,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub message: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfeasibleReason {
    TargetAboveReach,
    NoContributableAccount,
    ZeroSearchRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalInfeasible {
    pub reason: InfeasibleReason,
    pub target_net_worth: f64,
    pub reference_age: u32,
    /// Net worth at the reference age with the largest contribution searched.
    pub max_achievable_net_worth: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum GoalOutcome {
    Solved(GoalSolution),
    Infeasible(GoalInfeasible),
}

impl GoalOutcome {
    pub fn is_solved(&self) -> bool {
        matches!(self, GoalOutcome::Solved(_))
    }
}

/// How a total annual contribution is split across the plan's accounts.
#[derive(Debug, Clone)]
struct ContributionMix {
    /// Contributable account indices, each with a fill cap, in fill order.
    tiers: Vec<(usize, f64)>,
    /// Receives what the capped tiers cannot hold.
    overflow: Option<usize>,
    /// Shares for proportional splitting, summing to 1.
    weights: Vec<(usize, f64)>,
}

impl ContributionMix {
    fn from_plan(plan: &Plan, preference: ContributionPreference) -> Option<Self> {
        let first = |kinds: &[AccountKind]| {
            kinds.iter().find_map(|kind| {
                plan.accounts.iter().position(|a| a.kind == *kind)
            })
        };
        let liquid = first(&[AccountKind::Taxable, AccountKind::Cash]);
        let deferred = first(&[AccountKind::TaxDeferred]);
        let tax_free = first(&[AccountKind::TaxFree, AccountKind::Roth401k]);

        let ordered = |tiers: Vec<(Option<usize>, f64)>| -> Option<Self> {
            let tiers: Vec<(usize, f64)> = tiers
                .into_iter()
                .filter_map(|(slot, cap)| slot.map(|s| (s, cap)))
                .collect();
            let overflow = liquid.or_else(|| tiers.last().map(|(slot, _)| *slot));
            overflow.map(|overflow| Self {
                tiers,
                overflow: Some(overflow),
                weights: Vec::new(),
            })
        };

        match preference {
            ContributionPreference::Proportional => {
                let configured: Vec<(usize, f64)> = plan
                    .accounts
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.kind.accepts_contributions() && a.annual_contribution > 0.0)
                    .map(|(i, a)| (i, a.annual_contribution))
                    .collect();
                let total: f64 = configured.iter().map(|(_, c)| c).sum();
                if total <= 1e-12 {
                    return Self::from_plan(plan, ContributionPreference::TaxDeferredFirst);
                }
                Some(Self {
                    tiers: Vec::new(),
                    overflow: None,
                    weights: configured.into_iter().map(|(i, c)| (i, c / total)).collect(),
                })
            }
            ContributionPreference::TaxDeferredFirst => ordered(vec![
                (deferred, TAX_DEFERRED_FILL),
                (tax_free, TAX_FREE_FILL),
            ]),
            ContributionPreference::TaxFreeFirst => ordered(vec![
                (tax_free, TAX_FREE_FILL),
                (deferred, TAX_DEFERRED_FILL),
            ]),
            ContributionPreference::TaxableOnly => liquid.map(|slot| Self {
                tiers: Vec::new(),
                overflow: Some(slot),
                weights: Vec::new(),
            }),
        }
    }

    fn allocation_for_total(&self, accounts: usize, total: f64) -> Vec<f64> {
        let total = total.max(0.0);
        let mut amounts = vec![0.0; accounts];
        if !self.weights.is_empty() {
            for &(slot, weight) in &self.weights {
                amounts[slot] += total * weight;
            }
            return amounts;
        }
        let mut remaining = total;
        for &(slot, cap) in &self.tiers {
            let take = remaining.min(cap);
            amounts[slot] += take;
            remaining -= take;
        }
        if let Some(slot) = self.overflow {
            amounts[slot] += remaining;
        }
        amounts
    }
}

/// Copy of `plan` whose annual contributions are `amounts`, by account index.
fn with_contributions(plan: &Plan, amounts: &[f64]) -> Plan {
    let mut plan = plan.clone();
    for (account, &amount) in plan.accounts.iter_mut().zip(amounts) {
        if account.kind.accepts_contributions() {
            account.annual_contribution = amount;
        }
    }
    plan
}

/// Applies a solved allocation to the plan it was solved for.
pub fn apply_solution(plan: &Plan, solution: &GoalSolution) -> Plan {
    let amounts: Vec<f64> = plan
        .accounts
        .iter()
        .map(|account| {
            solution
                .allocation
                .iter()
                .find(|share| share.account_id == account.id)
                .map(|share| share.amount)
                .unwrap_or(0.0)
        })
        .collect();
    with_contributions(plan, &amounts)
}

/// Finds the total annual contribution that lands the projected net worth at
/// the reference age within tolerance of the target. Bisection between zero
/// and a multiple of gross income; each candidate is a full simulation.
pub fn solve_goal(plan: &Plan) -> Result<GoalOutcome, PlanError> {
    let config = GoalSolveConfig::from_plan(plan)?;
    let infeasible = |reason, max_achievable_net_worth, message: &str| {
        GoalOutcome::Infeasible(GoalInfeasible {
            reason,
            target_net_worth: config.target_net_worth,
            reference_age: config.reference_age,
            max_achievable_net_worth,
            message: message.to_string(),
        })
    };

    let Some(mix) = ContributionMix::from_plan(plan, config.preference) else {
        // Still surface structural errors before reporting infeasibility.
        simulate(plan)?;
        return Ok(infeasible(
            InfeasibleReason::NoContributableAccount,
            None,
            "No account can receive contributions under the chosen preference.",
        ));
    };

    let low_eval = evaluate_candidate(plan, config.search_min, &mix)?;
    if low_eval + config.tolerance >= config.target_net_worth {
        return Ok(solved(
            plan,
            &config,
            &mix,
            config.search_min,
            low_eval,
            Vec::new(),
            true,
            "Target already met without additional contributions.",
        ));
    }
    if config.search_max <= config.search_min {
        return Ok(infeasible(
            InfeasibleReason::ZeroSearchRange,
            Some(low_eval),
            "No wage or secondary income to search contributions against.",
        ));
    }
    let high_eval = evaluate_candidate(plan, config.search_max, &mix)?;
    if high_eval + config.tolerance < config.target_net_worth {
        return Ok(infeasible(
            InfeasibleReason::TargetAboveReach,
            Some(high_eval),
            "No feasible contribution found within the search bounds.",
        ));
    }

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut lo = config.search_min;
    let mut hi = config.search_max;
    let mut best = (hi, high_eval);
    let mut converged = (high_eval - config.target_net_worth).abs() <= config.tolerance;
    let mut it = 0;
    while !converged && it < config.max_iterations {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let net_worth = evaluate_candidate(plan, mid, &mix)?;
        iterations.push(GoalSolveIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_value: mid,
            net_worth,
        });

        if net_worth >= config.target_net_worth - config.tolerance {
            hi = mid;
            best = (mid, net_worth);
        } else {
            lo = mid;
        }
        if (net_worth - config.target_net_worth).abs() <= config.tolerance {
            converged = true;
        }
    }
    tracing::debug!(
        iterations = iterations.len(),
        converged,
        contribution = best.0,
        "goal solve finished"
    );

    let message = if converged {
        "Solved required contribution."
    } else {
        "Reached max iterations before tolerance was met; returning best estimate."
    };
    Ok(solved(
        plan, &config, &mix, best.0, best.1, iterations, converged, message,
    ))
}

#[allow(clippy::too_many_arguments)]
fn solved(
    plan: &Plan,
    config: &GoalSolveConfig,
    mix: &ContributionMix,
    total: f64,
    achieved: f64,
    iterations: Vec<GoalSolveIteration>,
    converged: bool,
    message: &str,
) -> GoalOutcome {
    let amounts = mix.allocation_for_total(plan.accounts.len(), total);
    let allocation = plan
        .accounts
        .iter()
        .zip(&amounts)
        .filter(|(account, _)| account.kind.accepts_contributions())
        .map(|(account, &amount)| ContributionShare {
            account_id: account.id.clone(),
            kind: account.kind,
            amount,
        })
        .collect();
    GoalOutcome::Solved(GoalSolution {
        target_net_worth: config.target_net_worth,
        reference_age: config.reference_age,
        required_contribution: total,
        allocation,
        achieved_net_worth: achieved,
        search_max: config.search_max,
        iterations,
        converged,
        message: message.to_string(),
    })
}

fn evaluate_candidate(
    base_plan: &Plan,
    candidate_value: f64,
    mix: &ContributionMix,
) -> Result<f64, PlanError> {
    let amounts = mix.allocation_for_total(base_plan.accounts.len(), candidate_value);
    let plan = with_contributions(base_plan, &amounts);
    let result = simulate(&plan)?;
    Ok(result.summary.net_worth_at_reference_age)
}

fn validate_config(plan: &Plan, config: &GoalSolveConfig) -> Result<(), PlanError> {
    let personal = &plan.personal;
    if config.reference_age < personal.current_age || config.reference_age > personal.terminal_age {
        return Err(PlanError::InvalidGoal(format!(
            "referenceAge {} must be within {}..={}",
            config.reference_age, personal.current_age, personal.terminal_age
        )));
    }
    if !config.target_net_worth.is_finite() {
        return Err(PlanError::InvalidGoal(
            "targetNetWorth must be finite".to_string(),
        ));
    }
    if !config.search_max.is_finite() || config.search_max < 0.0 {
        return Err(PlanError::InvalidGoal(
            "maxIncomeMultiple must be a finite number >= 0".to_string(),
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(PlanError::InvalidGoal("tolerance must be > 0".to_string()));
    }
    if config.max_iterations == 0 {
        return Err(PlanError::InvalidGoal(
            "maxIterations must be > 0".to_string(),
        ));
    }
    Ok(())
}
