use serde::{Deserialize, Serialize};

use super::engine::validate_plan;
use super::error::PlanError;
use super::moves::{Move, find_spec_by_id, set_move_enabled};
use super::types::{Account, Plan};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpenseLine {
    Living,
    Housing,
    Healthcare,
    RetireeHealthcareBridge,
    PerDependent,
}

/// A single typed change to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "kebab-case")]
pub enum PlanEdit {
    CurrentAge { age: u32 },
    RetirementAge { age: u32 },
    TerminalAge { age: u32 },
    Wages { amount: f64 },
    RaiseRate { rate: f64 },
    #[serde(rename_all = "camelCase")]
    AccountBalance { account_id: String, balance: f64 },
    #[serde(rename_all = "camelCase")]
    AccountContribution { account_id: String, amount: f64 },
    /// `None` falls back to the blended allocation return.
    #[serde(rename_all = "camelCase")]
    AccountReturn { account_id: String, rate: Option<f64> },
    Expense { line: ExpenseLine, amount: f64 },
    ClaimAge { age: u32 },
    #[serde(rename_all = "camelCase")]
    Sensitivity { bear_return_delta: f64, bull_return_delta: f64 },
    #[serde(rename_all = "camelCase")]
    MoveEnabled { move_id: String, enabled: bool },
    #[serde(rename_all = "camelCase")]
    MoveAmount { move_id: String, amount: f64 },
    #[serde(rename_all = "camelCase")]
    MoveWindow { move_id: String, start_age: u32, end_age: Option<u32> },
}

impl Plan {
    /// Returns a new plan with `edit` applied, or the validation error the
    /// edited plan would fail with. `self` is never modified.
    pub fn with_edit(&self, edit: PlanEdit) -> Result<Plan, PlanError> {
        let mut next = self.clone();
        match edit {
            PlanEdit::CurrentAge { age } => next.personal.current_age = age,
            PlanEdit::RetirementAge { age } => next.personal.retirement_age = age,
            PlanEdit::TerminalAge { age } => next.personal.terminal_age = age,
            PlanEdit::Wages { amount } => next.income.wages = amount,
            PlanEdit::RaiseRate { rate } => next.income.raise_rate = rate,
            PlanEdit::AccountBalance { account_id, balance } => {
                account_mut(&mut next, &account_id)?.balance = balance;
            }
            PlanEdit::AccountContribution { account_id, amount } => {
                account_mut(&mut next, &account_id)?.annual_contribution = amount;
            }
            PlanEdit::AccountReturn { account_id, rate } => {
                account_mut(&mut next, &account_id)?.expected_return = rate;
            }
            PlanEdit::Expense { line, amount } => {
                let expenses = &mut next.expenses;
                let slot = match line {
                    ExpenseLine::Living => &mut expenses.living,
                    ExpenseLine::Housing => &mut expenses.housing,
                    ExpenseLine::Healthcare => &mut expenses.healthcare,
                    ExpenseLine::RetireeHealthcareBridge => &mut expenses.retiree_healthcare_bridge,
                    ExpenseLine::PerDependent => &mut expenses.per_dependent,
                };
                *slot = amount;
            }
            PlanEdit::ClaimAge { age } => next.social_security.claim_age = age,
            PlanEdit::Sensitivity {
                bear_return_delta,
                bull_return_delta,
            } => {
                next.sensitivity.bear_return_delta = bear_return_delta;
                next.sensitivity.bull_return_delta = bull_return_delta;
            }
            PlanEdit::MoveEnabled { move_id, enabled } => {
                if next.find_move(&move_id).is_none() {
                    // Catalog moves can be switched on before the plan stores them.
                    let spec = find_spec_by_id(&move_id)
                        .ok_or_else(|| PlanError::UnknownMove(move_id.clone()))?;
                    next.moves
                        .push(spec.instantiate(next.personal.current_age, None));
                }
                next.moves = set_move_enabled(&next.moves, &move_id, enabled);
            }
            PlanEdit::MoveAmount { move_id, amount } => {
                move_mut(&mut next, &move_id)?.amount = amount;
            }
            PlanEdit::MoveWindow {
                move_id,
                start_age,
                end_age,
            } => {
                let mv = move_mut(&mut next, &move_id)?;
                mv.start_age = start_age;
                mv.end_age = end_age;
            }
        }
        validate_plan(&next)?;
        Ok(next)
    }

    /// Applies edits in order, stopping at the first invalid one.
    pub fn with_edits(&self, edits: impl IntoIterator<Item = PlanEdit>) -> Result<Plan, PlanError> {
        edits
            .into_iter()
            .try_fold(self.clone(), |plan, edit| plan.with_edit(edit))
    }
}

fn account_mut<'a>(plan: &'a mut Plan, id: &str) -> Result<&'a mut Account, PlanError> {
    plan.accounts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| PlanError::UnknownAccount(id.to_string()))
}

fn move_mut<'a>(plan: &'a mut Plan, id: &str) -> Result<&'a mut Move, PlanError> {
    plan.moves
        .iter_mut()
        .find(|m| m.id == id)
        .ok_or_else(|| PlanError::UnknownMove(id.to_string()))
}
