use std::collections::HashSet;

use super::error::PlanError;
use super::ledger::Ledger;
use super::moves::{Move, MoveCategory, MoveKind, find_spec};
use super::states::state_rate;
use super::summary::summarize;
use super::tax::{
    TaxInput, assess, bracket_ceiling, round_money, standard_deduction, taxable_social_security,
};
use super::types::{
    AccountBalance, AccountKind, ExpenseBreakdown, FilingStatus, IncomeBreakdown, MoveEffects,
    Phase, Plan, SimulationResult, Status, TrackResult, YearResult,
};
use super::withdrawal::{WithdrawalOrder, WithdrawalRequest, cover_shortfall};

pub const MAX_TERMINAL_AGE: u32 = 120;

const PENALTY_FREE_AGE: u32 = 60;
const RULE_OF_55_AGE: u32 = 55;
const MEDICARE_AGE: u32 = 65;
const QCD_AGE: u32 = 70;
const RMD_AGE: u32 = 73;
const EARLIEST_CLAIM_AGE: u32 = 62;
const LATEST_CLAIM_AGE: u32 = 70;
const FOREIGN_PENSION_HAIRCUT: f64 = 0.35;
const EARLIEST_FULL_RETIREMENT_AGE: u32 = 62;
const FUNDING_TOLERANCE: f64 = 1e-6;
const MAX_FUNDING_PASSES: u32 = 50;
const TAX_LOSS_OFFSET: f64 = 3_000.0;

// 2025 contribution limits; indexed with the tax thresholds.
const DEFERRAL_LIMIT: f64 = 23_500.0;
const DEFERRAL_CATCH_UP: f64 = 7_500.0;
const IRA_LIMIT: f64 = 7_000.0;
const IRA_CATCH_UP: f64 = 1_000.0;
const HSA_SELF_LIMIT: f64 = 4_300.0;
const HSA_FAMILY_LIMIT: f64 = 8_550.0;
const HSA_CATCH_UP: f64 = 1_000.0;
const CATCH_UP_AGE: u32 = 50;
const HSA_CATCH_UP_AGE: u32 = 55;

/// IRS uniform lifetime divisors for ages 73 through 120.
const UNIFORM_LIFETIME: [f64; 48] = [
    26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7,
    12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2, 4.9, 4.6, 4.3,
    4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];

/// Projects the plan one age at a time from `currentAge` to `terminalAge`.
///
/// Only structurally invalid plans are rejected. FAIL years, unmet shortfalls
/// and exhausted accounts are reported in the returned years and the
/// projection always covers the full horizon.
pub fn simulate(plan: &Plan) -> Result<SimulationResult, PlanError> {
    validate_plan(plan)?;
    let ctx = PlanContext::new(plan);
    let mut simulator = Simulator::new(&ctx);

    let years: Vec<YearResult> = (plan.personal.current_age..=plan.personal.terminal_age)
        .map(|age| simulator.step(age))
        .collect();
    let summary = summarize(plan, &years);
    tracing::debug!(
        years = years.len(),
        first_failure_age = ?summary.first_failure_age,
        terminal_net_worth = summary.terminal_net_worth,
        "simulation complete"
    );
    Ok(SimulationResult { years, summary })
}

pub fn validate_plan(plan: &Plan) -> Result<(), PlanError> {
    let personal = &plan.personal;
    if personal.retirement_age < personal.current_age {
        return Err(PlanError::InvertedAges {
            current: personal.current_age,
            retirement: personal.retirement_age,
        });
    }
    if personal.terminal_age < personal.current_age || personal.terminal_age > MAX_TERMINAL_AGE {
        return Err(PlanError::InvalidHorizon {
            current: personal.current_age,
            terminal: personal.terminal_age,
            max: MAX_TERMINAL_AGE,
        });
    }

    let income = &plan.income;
    non_negative("income.wages", income.wages)?;
    non_negative("income.secondaryIncome", income.secondary_income)?;
    non_negative("income.passiveIncome", income.passive_income)?;
    growth_rate("income.raiseRate", income.raise_rate)?;
    growth_rate("income.passiveIncomeGrowth", income.passive_income_growth)?;
    growth_rate("income.contributionGrowth", income.contribution_growth)?;

    let mut seen = HashSet::new();
    for account in &plan.accounts {
        if !seen.insert(account.id.as_str()) {
            return Err(PlanError::DuplicateAccount(account.id.clone()));
        }
        non_negative(&format!("accounts[{}].balance", account.id), account.balance)?;
        non_negative(
            &format!("accounts[{}].annualContribution", account.id),
            account.annual_contribution,
        )?;
        if let Some(rate) = account.expected_return {
            growth_rate(&format!("accounts[{}].expectedReturn", account.id), rate)?;
        }
        if let Some(employer) = account.employer_match {
            non_negative(&format!("accounts[{}].employerMatch.rate", account.id), employer.rate)?;
            non_negative(
                &format!("accounts[{}].employerMatch.wageLimit", account.id),
                employer.wage_limit,
            )?;
        }
    }

    let expenses = &plan.expenses;
    non_negative("expenses.living", expenses.living)?;
    non_negative("expenses.housing", expenses.housing)?;
    non_negative("expenses.healthcare", expenses.healthcare)?;
    non_negative("expenses.retireeHealthcareBridge", expenses.retiree_healthcare_bridge)?;
    non_negative("expenses.perDependent", expenses.per_dependent)?;
    growth_rate("expenses.generalInflation", expenses.general_inflation)?;
    growth_rate("expenses.medicalInflation", expenses.medical_inflation)?;

    non_negative(
        "socialSecurity.benefitAtFullRetirementAge",
        plan.social_security.benefit_at_full_retirement_age,
    )?;
    let full_retirement_age = plan.social_security.full_retirement_age;
    if !(EARLIEST_FULL_RETIREMENT_AGE..=MAX_TERMINAL_AGE).contains(&full_retirement_age) {
        return Err(PlanError::InvalidAge {
            field: "socialSecurity.fullRetirementAge".to_string(),
            age: full_retirement_age,
            min: EARLIEST_FULL_RETIREMENT_AGE,
            max: MAX_TERMINAL_AGE,
        });
    }
    if let Some(rate) = plan.tax.state_rate {
        non_negative("tax.stateRate", rate)?;
    }
    finite("tax.taxableGainFraction", plan.tax.taxable_gain_fraction)?;

    let allocation = &plan.allocation;
    finite("allocation.stocksPct", allocation.stocks_pct)?;
    finite("allocation.bondsPct", allocation.bonds_pct)?;
    finite("allocation.cashPct", allocation.cash_pct)?;
    growth_rate("allocation.stockReturn", allocation.stock_return)?;
    growth_rate("allocation.bondReturn", allocation.bond_return)?;
    growth_rate("allocation.cashReturn", allocation.cash_return)?;
    finite("sensitivity.bearReturnDelta", plan.sensitivity.bear_return_delta)?;
    finite("sensitivity.bullReturnDelta", plan.sensitivity.bull_return_delta)?;

    for mv in &plan.moves {
        non_negative(&format!("moves[{}].amount", mv.id), mv.amount)?;
    }
    Ok(())
}

fn finite(field: &str, value: f64) -> Result<f64, PlanError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PlanError::non_finite(field))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), PlanError> {
    if finite(field, value)? < 0.0 {
        return Err(PlanError::negative(field));
    }
    Ok(())
}

fn growth_rate(field: &str, value: f64) -> Result<(), PlanError> {
    if finite(field, value)? <= -1.0 {
        return Err(PlanError::InvalidRate {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Monthly reduction for claiming early and yearly credit for delaying,
/// relative to full retirement age.
pub fn claim_adjustment(claim_age: u32, full_retirement_age: u32) -> f64 {
    if claim_age < full_retirement_age {
        let months = (full_retirement_age - claim_age).saturating_mul(12);
        let first = months.min(36);
        let rest = months - first;
        (1.0 - first as f64 * 5.0 / 900.0 - rest as f64 * 5.0 / 1200.0).max(0.0)
    } else {
        let delayed = claim_age.min(LATEST_CLAIM_AGE).saturating_sub(full_retirement_age);
        1.0 + 0.08 * delayed as f64
    }
}

fn rmd_divisor(age: u32) -> Option<f64> {
    if age < RMD_AGE {
        return None;
    }
    let index = ((age - RMD_AGE) as usize).min(UNIFORM_LIFETIME.len() - 1);
    Some(UNIFORM_LIFETIME[index])
}

fn category_of(kind: MoveKind) -> MoveCategory {
    find_spec(kind)
        .map(|spec| spec.category)
        .unwrap_or(MoveCategory::LifeEvent)
}

/// Known moves active at `age`, in category precedence. Plan order is kept
/// within a category.
fn active_moves(plan: &Plan, age: u32) -> Vec<(MoveKind, &Move)> {
    let mut active: Vec<(MoveKind, &Move)> = plan
        .moves
        .iter()
        .filter(|mv| mv.is_active_at(age))
        .filter_map(|mv| mv.kind().map(|kind| (kind, mv)))
        .collect();
    active.sort_by_key(|(kind, _)| {
        MoveCategory::PRECEDENCE
            .iter()
            .position(|category| *category == category_of(*kind))
    });
    active
}

/// Housing cost multiplier from home moves that have already happened.
fn housing_factor(plan: &Plan, age: u32) -> f64 {
    let mut factor: f64 = 1.0;
    for mv in plan.moves.iter().filter(|mv| mv.enabled && age >= mv.start_age) {
        match mv.kind() {
            Some(MoveKind::SellHome | MoveKind::PayOffMortgage) => factor = 0.0,
            Some(MoveKind::DownsizeHome) => factor = factor.min(0.5),
            _ => {}
        }
    }
    factor
}

/// Per-plan values that stay fixed across the horizon.
struct PlanContext<'a> {
    plan: &'a Plan,
    /// Base growth rate per ledger slot.
    growth: Vec<f64>,
    /// Slots that earn the cash rate and ignore allocation moves and deltas.
    cash_slots: Vec<bool>,
    state_rate: f64,
    claim_age: u32,
    claim_factor: f64,
}

impl<'a> PlanContext<'a> {
    fn new(plan: &'a Plan) -> Self {
        let blended = plan.allocation.blended_return();
        let cash_return = plan.allocation.cash_return;
        let mut growth: Vec<f64> = plan
            .accounts
            .iter()
            .map(|account| {
                account.expected_return.unwrap_or(if account.kind.is_cash_like() {
                    cash_return
                } else {
                    blended
                })
            })
            .collect();
        growth.push(cash_return);
        let mut cash_slots: Vec<bool> =
            plan.accounts.iter().map(|a| a.kind.is_cash_like()).collect();
        cash_slots.push(true);

        let mut claim_age = plan.social_security.claim_age;
        for mv in plan.moves.iter().filter(|mv| mv.enabled) {
            match mv.kind() {
                Some(MoveKind::DelaySocialSecurity) => claim_age = LATEST_CLAIM_AGE,
                Some(MoveKind::ClaimSocialSecurityEarly) => claim_age = EARLIEST_CLAIM_AGE,
                _ => {}
            }
        }
        let claim_age = claim_age.clamp(EARLIEST_CLAIM_AGE, LATEST_CLAIM_AGE);

        Self {
            plan,
            growth,
            cash_slots,
            state_rate: plan
                .tax
                .state_rate
                .unwrap_or_else(|| state_rate(&plan.personal.state)),
            claim_age,
            claim_factor: claim_adjustment(claim_age, plan.social_security.full_retirement_age),
        }
    }

    fn rates(&self, adjustment: f64, delta: f64) -> Vec<f64> {
        self.growth
            .iter()
            .zip(&self.cash_slots)
            .map(|(&rate, &cash)| if cash { rate } else { rate + adjustment + delta })
            .collect()
    }
}

/// Compounding multipliers for one simulated age.
#[derive(Copy, Clone, Debug)]
struct YearIndex {
    age: u32,
    elapsed: i32,
    phase: Phase,
    general: f64,
    medical: f64,
    brackets: f64,
}

impl YearIndex {
    fn new(plan: &Plan, age: u32) -> Self {
        let elapsed = (age - plan.personal.current_age) as i32;
        let general = (1.0 + plan.expenses.general_inflation).powi(elapsed);
        Self {
            age,
            elapsed,
            phase: if age < plan.personal.retirement_age {
                Phase::Working
            } else {
                Phase::Retired
            },
            general,
            medical: (1.0 + plan.expenses.medical_inflation).powi(elapsed),
            brackets: if plan.tax.bracket_indexing { general } else { 1.0 },
        }
    }

    fn grown(&self, base: f64, rate: f64) -> f64 {
        base * (1.0 + rate).powi(self.elapsed)
    }

    fn working(&self) -> bool {
        self.phase == Phase::Working
    }
}

/// Everything a year accumulates before its result is assembled.
#[derive(Debug)]
struct YearFlows {
    wages: f64,
    part_time: f64,
    secondary: f64,
    social_security: f64,
    passive: f64,
    distributions: f64,
    contributions: f64,
    employee_by_slot: Vec<f64>,
    match_by_slot: Vec<f64>,
    deferred_401k: f64,
    roth_deferral_share: f64,
    pre_tax_deferrals: f64,
    employer_match: f64,
    conversions: f64,
    loss_offset: f64,
    growth_adjustment: f64,
    order: WithdrawalOrder,
    penalty_waived: bool,
    sepp: f64,
    take_rmd: bool,
    qcd: f64,
    guardrail_cut: f64,
    tuition: f64,
    ltc_premium: f64,
    state_rate: f64,
    effects: MoveEffects,
}

impl YearFlows {
    fn new(slots: usize, state_rate: f64) -> Self {
        Self {
            wages: 0.0,
            part_time: 0.0,
            secondary: 0.0,
            social_security: 0.0,
            passive: 0.0,
            distributions: 0.0,
            contributions: 0.0,
            employee_by_slot: vec![0.0; slots],
            match_by_slot: vec![0.0; slots],
            deferred_401k: 0.0,
            roth_deferral_share: 0.0,
            pre_tax_deferrals: 0.0,
            employer_match: 0.0,
            conversions: 0.0,
            loss_offset: 0.0,
            growth_adjustment: 0.0,
            order: WithdrawalOrder::TaxEfficient,
            penalty_waived: false,
            sepp: 0.0,
            take_rmd: false,
            qcd: 0.0,
            guardrail_cut: 0.0,
            tuition: 0.0,
            ltc_premium: 0.0,
            state_rate,
            effects: MoveEffects::default(),
        }
    }

    fn earned(&self) -> f64 {
        self.wages + self.part_time
    }

    fn gross_income(&self) -> f64 {
        self.earned() + self.secondary + self.social_security + self.passive + self.distributions
    }

    /// Ordinary income other than Social Security, net of deferrals and offsets.
    fn ordinary_income(&self) -> f64 {
        (self.earned() + self.secondary + self.passive + self.distributions + self.conversions
            - self.pre_tax_deferrals
            - self.loss_offset)
            .max(0.0)
    }
}

/// Transfers that happen after growth, applied identically to every track.
#[derive(Copy, Clone, Debug, Default)]
struct Structural {
    roth_401k_rollover: bool,
    liquidate_foreign_pension: bool,
    education_draw: f64,
}

#[derive(Copy, Clone, Debug, Default)]
struct StructuralOutcome {
    rolled_over: f64,
    pension_proceeds: f64,
    education_drawn: f64,
    uncovered: f64,
}

fn apply_structural(ledger: &mut Ledger, schedule: Structural) -> StructuralOutcome {
    let mut outcome = StructuralOutcome::default();
    if schedule.roth_401k_rollover {
        if let Some(dest) = ledger.first_of(AccountKind::TaxFree) {
            let moved = ledger.debit_kind(AccountKind::Roth401k, f64::INFINITY);
            ledger.credit(dest, moved);
            outcome.rolled_over = moved;
        }
    }
    if schedule.liquidate_foreign_pension {
        let gross = ledger.debit_kind(AccountKind::ForeignPension, f64::INFINITY);
        let net = gross * (1.0 - FOREIGN_PENSION_HAIRCUT);
        ledger.deposit_liquid(net);
        outcome.pension_proceeds = net;
    }
    if schedule.education_draw > 0.0 {
        let drawn = ledger.debit_kind(AccountKind::Education, schedule.education_draw);
        let short = schedule.education_draw - drawn;
        outcome.education_drawn = drawn;
        outcome.uncovered = short - ledger.debit_cash_like(short);
    }
    outcome
}

struct Simulator<'a> {
    ctx: &'a PlanContext<'a>,
    base: Ledger,
    bear: Ledger,
    bull: Ledger,
    retirement_start_net_worth: Option<f64>,
}

impl<'a> Simulator<'a> {
    fn new(ctx: &'a PlanContext<'a>) -> Self {
        let base = Ledger::from_accounts(&ctx.plan.accounts);
        Self {
            ctx,
            bear: base.clone(),
            bull: base.clone(),
            base,
            retirement_start_net_worth: None,
        }
    }

    fn step(&mut self, age: u32) -> YearResult {
        let plan = self.ctx.plan;
        let year = YearIndex::new(plan, age);
        let opening = self.base.clone();
        let active = active_moves(plan, age);

        if !year.working() && self.retirement_start_net_worth.is_none() {
            self.retirement_start_net_worth = Some(opening.total());
        }

        // 1. income
        let mut flows = YearFlows::new(self.base.len(), self.ctx.state_rate);
        self.income(&year, &active, &mut flows);

        // 2. moves, by category
        for category in MoveCategory::PRECEDENCE {
            if category == MoveCategory::Contribution && year.working() {
                self.configured_contributions(&year, &mut flows);
            }
            for (kind, mv) in active.iter().filter(|(kind, _)| category_of(*kind) == category) {
                self.apply_move(*kind, mv, &year, &opening, &mut flows);
            }
            match category {
                MoveCategory::Contribution if year.working() => self.employer_match(&mut flows),
                MoveCategory::WithdrawalOrder => {
                    self.settle_distributions(&year, &opening, &mut flows)
                }
                _ => {}
            }
        }

        // 3. expenses
        let (expenses, education_covered) = self.expenses(&year, &flows);

        // 4. tax
        let mut tax_input = TaxInput {
            wages: flows.earned(),
            ordinary_income: flows.ordinary_income(),
            capital_gains: 0.0,
            social_security: flows.social_security,
            early_distributions: 0.0,
            filing_status: plan.personal.filing_status,
            state_rate: flows.state_rate,
            age,
            phase: year.phase,
            index: year.brackets,
        };
        let mut assessment = assess(&tax_input);

        // 5-6. cash flow and shortfall
        let income = flows.gross_income();
        let available = income - assessment.total() - expenses.total - flows.contributions;
        let mut unmet = 0.0;
        let mut surplus_saved = 0.0;
        if available < 0.0 {
            let shortfall = -available;
            match year.phase {
                Phase::Working => {
                    // Paying into the accounts the deficit draws from is a wash.
                    let mut uncovered =
                        shortfall - self.take_back_contributions(shortfall, true, &mut flows);
                    let drawn = self.base.debit_cash_like(uncovered);
                    flows.effects.withdrawal += drawn;
                    uncovered -= drawn;

                    // Contributions the year cannot pay for are not made. Undoing a
                    // pre-tax deferral raises the tax, so repeat until it settles.
                    let mut passes = 0;
                    while uncovered > FUNDING_TOLERANCE && passes < MAX_FUNDING_PASSES {
                        passes += 1;
                        let reversed = self.take_back_contributions(uncovered, false, &mut flows);
                        if reversed <= 0.0 {
                            break;
                        }
                        let before = assessment.total();
                        tax_input.ordinary_income = flows.ordinary_income();
                        assessment = assess(&tax_input);
                        uncovered += assessment.total() - before - reversed;
                    }
                    unmet = uncovered.max(0.0);
                }
                Phase::Retired => {
                    let outcome = cover_shortfall(
                        &mut self.base,
                        &WithdrawalRequest {
                            shortfall,
                            base: tax_input,
                            order: flows.order,
                            gain_fraction: plan.tax.taxable_gain_fraction,
                            penalize_deferred: age < PENALTY_FREE_AGE && !flows.penalty_waived,
                        },
                    );
                    assessment = outcome.assessment;
                    flows.effects.withdrawal += outcome.withdrawn;
                    unmet = outcome.unmet;
                }
            }
        } else if available > 0.0 {
            let forced = available.min(flows.distributions);
            surplus_saved = if plan.save_surplus { available } else { forced };
            self.base.deposit_liquid(surplus_saved);
        }

        // 7. growth
        let pre_growth = self.base.flows_since(&opening);
        self.base.grow(&self.ctx.rates(flows.growth_adjustment, 0.0));

        // 8. one-time transfers
        let schedule = Structural {
            roth_401k_rollover: active.iter().any(|(kind, mv)| {
                *kind == MoveKind::Roth401kRollover && age == mv.start_age
            }),
            liquidate_foreign_pension: age == plan.personal.retirement_age
                && active
                    .iter()
                    .any(|(kind, _)| *kind == MoveKind::ForeignPensionLiquidation),
            education_draw: education_covered,
        };
        let structural = apply_structural(&mut self.base, schedule);
        flows.effects.roth_401k_transfer = structural.rolled_over;
        flows.effects.foreign_pension_proceeds = structural.pension_proceeds;
        flows.effects.education_withdrawal = structural.education_drawn;
        unmet += structural.uncovered;

        // 9. shadow tracks
        let ctx = self.ctx;
        let sensitivity = &plan.sensitivity;
        for (ledger, delta) in [
            (&mut self.bear, sensitivity.bear_return_delta),
            (&mut self.bull, sensitivity.bull_return_delta),
        ] {
            ledger.apply_flows(&pre_growth);
            ledger.grow(&ctx.rates(flows.growth_adjustment, delta));
            apply_structural(ledger, schedule);
        }

        // 10. status
        let taxes = assessment.breakdown();
        let net_worth = round_money(self.base.total());
        let status = Status::from_net_worth(net_worth);
        if status.is_fail() {
            tracing::trace!(age, net_worth, unmet, "year failed");
        }

        YearResult {
            age,
            phase: year.phase,
            income: IncomeBreakdown {
                wages: round_money(flows.wages),
                secondary: round_money(flows.secondary + flows.part_time),
                social_security: round_money(flows.social_security),
                passive: round_money(flows.passive),
                distributions: round_money(flows.distributions),
                total: round_money(income),
            },
            net_cash_flow: round_money(income - assessment.total() - expenses.total),
            taxes,
            expenses: expenses.rounded(),
            contributions: round_money(flows.contributions),
            employer_match: round_money(flows.employer_match),
            unmet_shortfall: round_money(unmet),
            surplus_saved: round_money(surplus_saved),
            effects: rounded_effects(&flows.effects),
            balances: plan
                .accounts
                .iter()
                .enumerate()
                .map(|(slot, account)| AccountBalance {
                    id: account.id.clone(),
                    kind: account.kind,
                    balance: round_money(self.base.balance(slot)),
                })
                .collect(),
            unallocated_cash: round_money(self.base.unallocated()),
            net_worth,
            status,
            bear: track(&self.bear),
            bull: track(&self.bull),
            active_moves: active.iter().map(|(_, mv)| mv.id.clone()).collect(),
        }
    }

    fn income(&self, year: &YearIndex, active: &[(MoveKind, &Move)], flows: &mut YearFlows) {
        let plan = self.ctx.plan;
        let income = &plan.income;
        let is_active = |kind: MoveKind| active.iter().find(|(k, _)| *k == kind).map(|(_, mv)| *mv);

        if year.working() && is_active(MoveKind::Sabbatical).is_none() {
            flows.wages = year.grown(income.wages, income.raise_rate);
        }
        if income
            .secondary_income_end_age
            .is_none_or(|end| year.age <= end)
        {
            flows.secondary = income.secondary_income * year.general;
        }
        if let Some(mv) = is_active(MoveKind::PartTimeWork) {
            flows.part_time = mv.amount * year.general;
        }
        flows.passive = year.grown(income.passive_income, income.passive_income_growth);
        if year.age >= self.ctx.claim_age {
            flows.social_security = plan.social_security.benefit_at_full_retirement_age
                * year.general
                * self.ctx.claim_factor;
        }
        flows.roth_deferral_share = is_active(MoveKind::Roth401kContributions)
            .map(|mv| mv.amount.clamp(0.0, 1.0))
            .unwrap_or(0.0);
    }

    fn contribute(
        &mut self,
        slot: usize,
        amount: f64,
        payroll_deferral: bool,
        flows: &mut YearFlows,
    ) {
        if amount <= 0.0 {
            return;
        }
        self.base.credit(slot, amount);
        flows.employee_by_slot[slot] += amount;
        flows.contributions += amount;
        if self.base.kind(slot).is_pre_tax() {
            flows.pre_tax_deferrals += amount;
        }
        if payroll_deferral {
            flows.deferred_401k += amount;
        }
    }

    /// Splits a 401(k) deferral between the traditional and Roth 401(k).
    fn defer_401k(&mut self, amount: f64, flows: &mut YearFlows) {
        let traditional = self.base.first_of(AccountKind::TaxDeferred);
        let roth = self.base.first_of(AccountKind::Roth401k);
        let roth_share = match (traditional, roth) {
            (_, None) => 0.0,
            (None, Some(_)) => 1.0,
            (Some(_), Some(_)) => flows.roth_deferral_share,
        };
        if let Some(slot) = roth {
            self.contribute(slot, amount * roth_share, true, flows);
        }
        if let Some(slot) = traditional {
            self.contribute(slot, amount * (1.0 - roth_share), true, flows);
        }
    }

    fn deferral_room(&self, year: &YearIndex, flows: &YearFlows, catch_up: bool) -> f64 {
        let mut limit = DEFERRAL_LIMIT;
        if catch_up && year.age >= CATCH_UP_AGE {
            limit += DEFERRAL_CATCH_UP;
        }
        let room = limit * year.brackets - flows.deferred_401k;
        room.min(flows.wages - flows.deferred_401k).max(0.0)
    }

    fn ira_limit(year: &YearIndex) -> f64 {
        let catch_up = if year.age >= CATCH_UP_AGE { IRA_CATCH_UP } else { 0.0 };
        (IRA_LIMIT + catch_up) * year.brackets
    }

    fn configured_contributions(&mut self, year: &YearIndex, flows: &mut YearFlows) {
        let plan = self.ctx.plan;
        for (slot, account) in plan.accounts.iter().enumerate() {
            if !account.kind.accepts_contributions() {
                continue;
            }
            let amount = year.grown(account.annual_contribution, plan.income.contribution_growth);
            let payroll = matches!(account.kind, AccountKind::TaxDeferred | AccountKind::Roth401k);
            self.contribute(slot, amount, payroll, flows);
        }
    }

    /// Employer match earned by the employee contributions made to `slot`.
    fn matched(&self, slot: usize, flows: &YearFlows) -> f64 {
        let Some(employer) = self.ctx.plan.accounts.get(slot).and_then(|a| a.employer_match) else {
            return 0.0;
        };
        let eligible = flows.employee_by_slot[slot].min(employer.wage_limit * flows.wages);
        employer.rate * eligible.max(0.0)
    }

    fn employer_match(&mut self, flows: &mut YearFlows) {
        for slot in 0..self.ctx.plan.accounts.len() {
            let matched = self.matched(slot, flows);
            if matched > 0.0 {
                self.base.credit(slot, matched);
                flows.match_by_slot[slot] += matched;
                flows.employer_match += matched;
            }
        }
    }

    /// Removes up to `amount` of this year's employee contributions, last slot
    /// first, along with the match they no longer earn. `liquid_only` limits
    /// it to brokerage and cash slots. Returns the employee amount removed.
    fn take_back_contributions(
        &mut self,
        amount: f64,
        liquid_only: bool,
        flows: &mut YearFlows,
    ) -> f64 {
        let mut remaining = amount.max(0.0);
        for slot in (0..flows.employee_by_slot.len()).rev() {
            if remaining <= 0.0 {
                break;
            }
            let kind = self.base.kind(slot);
            if liquid_only && !matches!(kind, AccountKind::Cash | AccountKind::Taxable) {
                continue;
            }
            let taken = self
                .base
                .debit(slot, remaining.min(flows.employee_by_slot[slot]));
            if taken <= 0.0 {
                continue;
            }
            remaining -= taken;
            flows.employee_by_slot[slot] -= taken;
            flows.contributions -= taken;
            if kind.is_pre_tax() {
                flows.pre_tax_deferrals -= taken;
            }
            let excess = flows.match_by_slot[slot] - self.matched(slot, flows);
            if excess > 0.0 {
                let unmatched = self.base.debit(slot, excess);
                flows.match_by_slot[slot] -= unmatched;
                flows.employer_match -= unmatched;
            }
        }
        amount.max(0.0) - remaining
    }

    fn apply_move(
        &mut self,
        kind: MoveKind,
        mv: &Move,
        year: &YearIndex,
        opening: &Ledger,
        flows: &mut YearFlows,
    ) {
        let plan = self.ctx.plan;
        let amount = mv.amount.max(0.0);
        match category_of(kind) {
            MoveCategory::Contribution if !year.working() => {}
            MoveCategory::Contribution => self.apply_contribution(kind, amount, year, flows),
            MoveCategory::Conversion => match kind {
                MoveKind::RothConversion => {
                    self.convert_to_roth(amount, flows);
                }
                MoveKind::RothConversionBracketFill => {
                    let headroom = self.bracket_headroom(mv.amount, year, flows);
                    self.convert_to_roth(headroom, flows);
                }
                MoveKind::TaxLossHarvesting => {
                    if self.base.total_of(AccountKind::Taxable) > 0.0 {
                        flows.loss_offset = TAX_LOSS_OFFSET;
                    }
                }
                MoveKind::ConservativeGlidePath => flows.growth_adjustment -= amount,
                MoveKind::AggressiveAllocation => flows.growth_adjustment += amount,
                // Roth 401(k) rollover and foreign pension run after growth.
                _ => {}
            },
            MoveCategory::WithdrawalOrder => match kind {
                MoveKind::DeferredBeforeTaxable => flows.order = WithdrawalOrder::DeferredFirst,
                MoveKind::RothBeforeDeferred => flows.order = WithdrawalOrder::RothBeforeDeferred,
                MoveKind::ProportionalWithdrawals => flows.order = WithdrawalOrder::Proportional,
                MoveKind::RuleOf55 => {
                    flows.penalty_waived = plan.personal.retirement_age >= RULE_OF_55_AGE;
                }
                MoveKind::Sepp72t => flows.sepp = amount,
                MoveKind::RequiredMinimumDistributions => flows.take_rmd = year.age >= RMD_AGE,
                MoveKind::QualifiedCharitableDistribution if year.age >= QCD_AGE => {
                    flows.qcd = amount;
                }
                MoveKind::GuardrailSpendingCut => {
                    let below_start = self
                        .retirement_start_net_worth
                        .is_some_and(|start| opening.total() < start);
                    if !year.working() && below_start {
                        flows.guardrail_cut = amount.min(1.0);
                    }
                }
                _ => {}
            },
            MoveCategory::LifeEvent => match kind {
                MoveKind::SellHome | MoveKind::DownsizeHome | MoveKind::Inheritance
                    if year.age == mv.start_age =>
                {
                    let windfall = amount * year.general;
                    self.base.deposit_liquid(windfall);
                    flows.effects.windfall += windfall;
                }
                MoveKind::PayOffMortgage if year.age == mv.start_age => {
                    let paid = self.base.debit_cash_like(amount * year.general);
                    flows.effects.mortgage_payoff += paid;
                }
                MoveKind::RelocateNoIncomeTaxState => flows.state_rate = 0.0,
                MoveKind::LongTermCareInsurance => flows.ltc_premium = amount * year.medical,
                MoveKind::CollegeTuition => flows.tuition = amount * year.general,
                // Income and claiming moves are resolved with income.
                _ => {}
            },
        }
    }

    fn apply_contribution(
        &mut self,
        kind: MoveKind,
        amount: f64,
        year: &YearIndex,
        flows: &mut YearFlows,
    ) {
        let plan = self.ctx.plan;
        match kind {
            MoveKind::Max401k => {
                let room = self.deferral_room(year, flows, true);
                self.defer_401k(room, flows);
            }
            MoveKind::CatchUpContributions if year.age >= CATCH_UP_AGE => {
                let room = self.deferral_room(year, flows, true);
                self.defer_401k((DEFERRAL_CATCH_UP * year.brackets).min(room), flows);
            }
            MoveKind::EmployerMatchCapture => {
                for (slot, account) in plan.accounts.iter().enumerate() {
                    let Some(employer) = account.employer_match else {
                        continue;
                    };
                    let payroll =
                        matches!(account.kind, AccountKind::TaxDeferred | AccountKind::Roth401k);
                    let mut need = employer.wage_limit * flows.wages - flows.employee_by_slot[slot];
                    if payroll {
                        need = need.min(self.deferral_room(year, flows, true));
                    }
                    self.contribute(slot, need, payroll, flows);
                }
            }
            MoveKind::TraditionalIra => {
                if let Some(slot) = self.base.first_of(AccountKind::TaxDeferred) {
                    self.contribute(slot, amount.min(Self::ira_limit(year)), false, flows);
                }
            }
            MoveKind::RothIra | MoveKind::BackdoorRoth => {
                if let Some(slot) = self.base.first_of(AccountKind::TaxFree) {
                    self.contribute(slot, amount.min(Self::ira_limit(year)), false, flows);
                }
            }
            MoveKind::MegaBackdoorRoth => {
                let slot = self
                    .base
                    .first_of(AccountKind::Roth401k)
                    .or_else(|| self.base.first_of(AccountKind::TaxFree));
                if let Some(slot) = slot {
                    self.contribute(slot, amount, false, flows);
                }
            }
            MoveKind::HsaMax if year.age < MEDICARE_AGE => {
                if let Some(slot) = self.base.first_of(AccountKind::Hsa) {
                    let personal = &plan.personal;
                    let family = personal.dependents > 0
                        || personal.filing_status == FilingStatus::MarriedFilingJointly;
                    let mut limit = if family { HSA_FAMILY_LIMIT } else { HSA_SELF_LIMIT };
                    if year.age >= HSA_CATCH_UP_AGE {
                        limit += HSA_CATCH_UP;
                    }
                    let top_up = limit * year.brackets - flows.employee_by_slot[slot];
                    self.contribute(slot, top_up, false, flows);
                }
            }
            MoveKind::BrokerageInvesting => {
                let slot = self.base.liquid_slot();
                self.contribute(slot, amount, false, flows);
            }
            MoveKind::SavingsRateIncrease => {
                let slot = self.base.liquid_slot();
                self.contribute(slot, amount.min(1.0) * flows.wages, false, flows);
            }
            MoveKind::Education529 => {
                if let Some(slot) = self.base.first_of(AccountKind::Education) {
                    self.contribute(slot, amount, false, flows);
                }
            }
            _ => {}
        }
    }

    /// Moves up to `amount` from tax-deferred into the first tax-free account.
    fn convert_to_roth(&mut self, amount: f64, flows: &mut YearFlows) -> f64 {
        let Some(dest) = self.base.first_of(AccountKind::TaxFree) else {
            return 0.0;
        };
        let moved = self.base.debit_kind(AccountKind::TaxDeferred, amount);
        self.base.credit(dest, moved);
        flows.conversions += moved;
        flows.effects.roth_conversion += moved;
        moved
    }

    /// Taxable income that still fits under the top of the `rate` bracket.
    fn bracket_headroom(&self, rate: f64, year: &YearIndex, flows: &YearFlows) -> f64 {
        let status = self.ctx.plan.personal.filing_status;
        let Some(ceiling) = bracket_ceiling(status, rate, year.brackets) else {
            return 0.0;
        };
        let ordinary = flows.ordinary_income();
        let taxable = ordinary + taxable_social_security(flows.social_security, ordinary, status)
            - standard_deduction(status, year.age, year.brackets);
        (ceiling - taxable).max(0.0)
    }

    /// Charitable, 72(t) and required distributions, in that order.
    fn settle_distributions(&mut self, year: &YearIndex, opening: &Ledger, flows: &mut YearFlows) {
        let charitable = self.base.debit_kind(AccountKind::TaxDeferred, flows.qcd);
        flows.effects.charitable_distribution = charitable;
        let mut distributed = self.base.debit_kind(AccountKind::TaxDeferred, flows.sepp);
        if let Some(divisor) = rmd_divisor(year.age).filter(|_| flows.take_rmd) {
            let required = opening.total_of(AccountKind::TaxDeferred) / divisor;
            let outstanding = (required - charitable - distributed).max(0.0);
            distributed += self.base.debit_kind(AccountKind::TaxDeferred, outstanding);
        }
        flows.distributions = distributed;
    }

    /// Inflated expense lines and the share of tuition the 529 will cover.
    fn expenses(&self, year: &YearIndex, flows: &YearFlows) -> (ExpenseLines, f64) {
        let plan = self.ctx.plan;
        let e = &plan.expenses;
        let living = e.living * year.general * (1.0 - flows.guardrail_cut);
        let housing = if e.housing_end_age.is_some_and(|end| year.age >= end) {
            0.0
        } else {
            e.housing * year.general * housing_factor(plan, year.age)
        };
        let mut healthcare = e.healthcare * year.medical + flows.ltc_premium;
        if !year.working() && year.age < MEDICARE_AGE {
            healthcare += e.retiree_healthcare_bridge * year.medical;
        }
        let dependents = if plan
            .personal
            .dependents_until_age
            .is_none_or(|until| year.age < until)
        {
            e.per_dependent * plan.personal.dependents as f64 * year.general
        } else {
            0.0
        };
        let covered = flows.tuition.min(self.base.total_of(AccountKind::Education));
        let education = flows.tuition - covered;
        (
            ExpenseLines {
                living,
                housing,
                healthcare,
                dependents,
                education,
                total: living + housing + healthcare + dependents + education,
            },
            covered,
        )
    }
}

#[derive(Copy, Clone, Debug)]
struct ExpenseLines {
    living: f64,
    housing: f64,
    healthcare: f64,
    dependents: f64,
    education: f64,
    total: f64,
}

impl ExpenseLines {
    fn rounded(&self) -> ExpenseBreakdown {
        ExpenseBreakdown {
            living: round_money(self.living),
            housing: round_money(self.housing),
            healthcare: round_money(self.healthcare),
            dependents: round_money(self.dependents),
            education: round_money(self.education),
            total: round_money(self.total),
        }
    }
}

fn rounded_effects(effects: &MoveEffects) -> MoveEffects {
    MoveEffects {
        roth_conversion: round_money(effects.roth_conversion),
        roth_401k_transfer: round_money(effects.roth_401k_transfer),
        withdrawal: round_money(effects.withdrawal),
        foreign_pension_proceeds: round_money(effects.foreign_pension_proceeds),
        education_withdrawal: round_money(effects.education_withdrawal),
        charitable_distribution: round_money(effects.charitable_distribution),
        windfall: round_money(effects.windfall),
        mortgage_payoff: round_money(effects.mortgage_payoff),
    }
}

fn track(ledger: &Ledger) -> TrackResult {
    let net_worth = round_money(ledger.total());
    TrackResult {
        net_worth,
        status: Status::from_net_worth(net_worth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moves::find_spec;
    use crate::core::tax::{ordinary_brackets, progressive_tax};
    use crate::core::types::{Account, EmployerMatch};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    /// Flat economy: no returns, no inflation, no state tax.
    fn flat_plan(current: u32, retirement: u32, terminal: u32) -> Plan {
        let mut plan = Plan::new(current, retirement);
        plan.personal.terminal_age = terminal;
        plan.allocation.stock_return = 0.0;
        plan.allocation.bond_return = 0.0;
        plan.allocation.cash_return = 0.0;
        plan.expenses.general_inflation = 0.0;
        plan.expenses.medical_inflation = 0.0;
        plan.income.raise_rate = 0.0;
        plan.tax.state_rate = Some(0.0);
        plan
    }

    fn enabled(kind: MoveKind, start: u32, end: Option<u32>) -> Move {
        find_spec(kind)
            .expect("catalog move")
            .instantiate(start, end)
            .with_enabled(true)
    }

    fn balance(year: &YearResult, id: &str) -> f64 {
        year.balances
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.balance)
            .expect("account present")
    }

    fn mid_career_plan() -> Plan {
        let mut plan = Plan::new(41, 55);
        plan.personal.terminal_age = 90;
        plan.personal.state = "TX".to_string();
        plan.income.wages = 180_000.0;
        plan.income.raise_rate = 0.03;
        plan.social_security.benefit_at_full_retirement_age = 36_000.0;
        plan.social_security.claim_age = 70;
        plan.expenses.living = 60_000.0;
        plan.expenses.housing = 24_000.0;
        plan.expenses.housing_end_age = Some(60);
        plan.expenses.healthcare = 6_000.0;
        plan.accounts = vec![
            Account::new("cash", AccountKind::Cash, 30_000.0),
            Account::new("brokerage", AccountKind::Taxable, 250_000.0),
            Account::new("401k", AccountKind::TaxDeferred, 400_000.0),
            Account::new("roth", AccountKind::TaxFree, 90_000.0),
        ];
        plan.accounts[2].annual_contribution = 23_500.0;
        plan.accounts[2].employer_match = Some(EmployerMatch {
            rate: 0.5,
            wage_limit: 0.06,
        });
        plan
    }

    #[test]
    fn inverted_ages_are_rejected_before_simulating() {
        let plan = Plan::new(60, 55);
        assert_eq!(
            simulate(&plan),
            Err(PlanError::InvertedAges {
                current: 60,
                retirement: 55
            })
        );
    }

    #[test]
    fn structural_validation_errors() {
        let mut plan = flat_plan(40, 60, 121);
        assert!(matches!(simulate(&plan), Err(PlanError::InvalidHorizon { .. })));

        plan.personal.terminal_age = 90;
        plan.accounts = vec![
            Account::new("a", AccountKind::Cash, 1.0),
            Account::new("a", AccountKind::Taxable, 1.0),
        ];
        assert_eq!(simulate(&plan), Err(PlanError::DuplicateAccount("a".into())));

        plan.accounts = vec![Account::new("a", AccountKind::Cash, -1.0)];
        assert_eq!(
            simulate(&plan),
            Err(PlanError::negative("accounts[a].balance"))
        );

        plan.accounts.clear();
        plan.income.wages = f64::NAN;
        assert_eq!(simulate(&plan), Err(PlanError::non_finite("income.wages")));

        plan.income.wages = 0.0;
        plan.expenses.general_inflation = -1.0;
        assert!(matches!(simulate(&plan), Err(PlanError::InvalidRate { .. })));
    }

    #[test]
    fn retiring_immediately_with_terminal_equal_to_current_yields_one_year() {
        let plan = flat_plan(70, 70, 70);
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.years.len(), 1);
        assert_eq!(result.years[0].phase, Phase::Retired);
    }

    #[test]
    fn first_working_year_income_is_wages_only() {
        let plan = mid_career_plan();
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.years.len(), 50);

        let first = result.year(41).expect("age 41");
        assert_eq!(first.phase, Phase::Working);
        assert_eq!(first.income.wages, 180_000.0);
        assert_eq!(first.income.total, first.income.wages + first.income.secondary);
        assert_eq!(first.income.social_security, 0.0);
        assert_eq!(first.effects.withdrawal, 0.0);
        assert_eq!(first.status, Status::Ok);
        assert_eq!(first.employer_match, 5_400.0);

        let wage_42 = result.year(42).expect("age 42").income.wages;
        assert_eq!(wage_42, round_money(180_000.0 * 1.03));
        assert_eq!(result.year(55).expect("age 55").income.wages, 0.0);
        assert_eq!(result.year(69).expect("age 69").income.social_security, 0.0);
        assert!(result.year(70).expect("age 70").income.social_security > 36_000.0);

        for year in &result.years {
            if year.net_worth > 0.0 {
                assert_eq!(year.status, Status::Ok, "age {}", year.age);
            }
        }
    }

    #[test]
    fn roth_conversion_moves_capped_amount_and_taxes_it() {
        let mut plan = flat_plan(47, 60, 50);
        plan.income.wages = 100_000.0;
        plan.accounts = vec![
            Account::new("traditional", AccountKind::TaxDeferred, 56_000.0),
            Account::new("roth", AccountKind::TaxFree, 0.0),
            Account::new("cash", AccountKind::Cash, 10_000.0),
        ];
        let baseline = simulate(&plan).expect("valid plan");

        let mut conversion = enabled(MoveKind::RothConversion, 47, Some(47));
        conversion.amount = 45_000.0;
        plan.moves.push(conversion);
        let result = simulate(&plan).expect("valid plan");

        let year = result.year(47).expect("age 47");
        assert_eq!(year.effects.roth_conversion, 45_000.0);
        assert_eq!(balance(year, "traditional"), 11_000.0);
        assert_eq!(balance(year, "roth"), 45_000.0);

        let single = ordinary_brackets(FilingStatus::Single);
        assert_eq!(year.taxes.federal, round_money(progressive_tax(130_000.0, single, 1.0)));
        assert_eq!(
            baseline.year(47).expect("age 47").taxes.federal,
            round_money(progressive_tax(85_000.0, single, 1.0))
        );
        // Outside the window nothing moves.
        assert_eq!(result.year(48).expect("age 48").effects.roth_conversion, 0.0);
    }

    #[test]
    fn roth_conversion_is_limited_by_traditional_balance() {
        let mut plan = flat_plan(47, 60, 47);
        plan.income.wages = 100_000.0;
        plan.accounts = vec![
            Account::new("traditional", AccountKind::TaxDeferred, 30_000.0),
            Account::new("roth", AccountKind::TaxFree, 5_000.0),
        ];
        plan.moves.push(enabled(MoveKind::RothConversion, 47, None).with_amount(45_000.0));
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.effects.roth_conversion, 30_000.0);
        assert_eq!(balance(year, "traditional"), 0.0);
        assert_eq!(balance(year, "roth"), 35_000.0);
    }

    #[test]
    fn bracket_fill_converts_up_to_the_bracket_top() {
        let mut plan = flat_plan(62, 62, 62);
        plan.accounts = vec![
            Account::new("ira", AccountKind::TaxDeferred, 500_000.0),
            Account::new("roth", AccountKind::TaxFree, 0.0),
            Account::new("cash", AccountKind::Cash, 100_000.0),
        ];
        plan.moves.push(enabled(MoveKind::RothConversionBracketFill, 60, None));
        let year = &simulate(&plan).expect("valid plan").years[0];
        // 15,000 deduction plus taxable income up to the top of the 22% bracket.
        assert_eq!(year.effects.roth_conversion, 15_000.0 + 103_350.0);
        assert_eq!(year.taxes.marginal_ordinary_rate, 0.24);
    }

    #[test]
    fn employer_match_and_pre_tax_deferral_lower_federal_tax() {
        let mut plan = flat_plan(40, 65, 40);
        plan.income.wages = 100_000.0;
        let mut k401 = Account::new("401k", AccountKind::TaxDeferred, 0.0);
        k401.annual_contribution = 10_000.0;
        k401.employer_match = Some(EmployerMatch {
            rate: 0.5,
            wage_limit: 0.06,
        });
        plan.accounts = vec![k401, Account::new("cash", AccountKind::Cash, 0.0)];
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.contributions, 10_000.0);
        assert_eq!(year.employer_match, 3_000.0);
        assert_eq!(balance(year, "401k"), 13_000.0);
        assert_eq!(
            year.taxes.federal,
            round_money(progressive_tax(75_000.0, ordinary_brackets(FilingStatus::Single), 1.0))
        );
    }

    #[test]
    fn max_401k_tops_up_to_limit_with_catch_up() {
        let mut plan = flat_plan(52, 65, 52);
        plan.income.wages = 200_000.0;
        let mut k401 = Account::new("401k", AccountKind::TaxDeferred, 0.0);
        k401.annual_contribution = 5_000.0;
        plan.accounts = vec![k401, Account::new("cash", AccountKind::Cash, 0.0)];
        plan.moves.push(enabled(MoveKind::Max401k, 0, None));
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.contributions, 31_000.0);
        assert_eq!(balance(year, "401k"), 31_000.0);
    }

    #[test]
    fn contribution_moves_stop_at_retirement() {
        let mut plan = flat_plan(60, 61, 61);
        plan.income.wages = 80_000.0;
        plan.accounts = vec![
            Account::new("brokerage", AccountKind::Taxable, 50_000.0),
            Account::new("roth", AccountKind::TaxFree, 0.0),
        ];
        plan.moves.push(enabled(MoveKind::RothIra, 0, None).with_amount(10_000.0));
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.years[0].contributions, 8_000.0);
        assert_eq!(result.years[1].contributions, 0.0);
        assert_eq!(balance(&result.years[1], "roth"), 8_000.0);
    }

    #[test]
    fn working_deficit_draws_cash_like_only_and_leaves_rest_unmet() {
        let mut plan = flat_plan(40, 65, 40);
        plan.expenses.living = 10_000.0;
        plan.accounts = vec![
            Account::new("cash", AccountKind::Cash, 5_000.0),
            Account::new("401k", AccountKind::TaxDeferred, 100_000.0),
        ];
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.effects.withdrawal, 5_000.0);
        assert_eq!(year.unmet_shortfall, 5_000.0);
        assert_eq!(balance(year, "401k"), 100_000.0);
        assert_eq!(year.status, Status::Ok);
    }

    #[test]
    fn retirement_shortfall_draws_brokerage_before_deferred() {
        let mut plan = flat_plan(66, 66, 66);
        plan.expenses.living = 30_000.0;
        plan.accounts = vec![
            Account::new("401k", AccountKind::TaxDeferred, 200_000.0),
            Account::new("brokerage", AccountKind::Taxable, 100_000.0),
            Account::new("roth", AccountKind::TaxFree, 50_000.0),
        ];
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.effects.withdrawal, 30_000.0);
        assert_eq!(balance(year, "brokerage"), 70_000.0);
        assert_eq!(balance(year, "401k"), 200_000.0);
        assert_eq!(balance(year, "roth"), 50_000.0);
        assert_eq!(year.net_cash_flow, -30_000.0);
    }

    #[test]
    fn early_deferred_draws_are_penalized_unless_rule_of_55_applies() {
        let mut plan = flat_plan(56, 56, 56);
        plan.expenses.living = 30_000.0;
        plan.accounts = vec![Account::new("401k", AccountKind::TaxDeferred, 300_000.0)];
        let penalized = &simulate(&plan).expect("valid plan").years[0];
        assert!(penalized.taxes.early_withdrawal_penalty > 3_000.0);

        plan.moves.push(enabled(MoveKind::RuleOf55, 55, None));
        let waived = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(waived.taxes.early_withdrawal_penalty, 0.0);
        assert!(waived.effects.withdrawal < penalized.effects.withdrawal);
    }

    #[test]
    fn required_distribution_is_taxed_and_reinvested() {
        let mut plan = flat_plan(73, 73, 73);
        plan.social_security.benefit_at_full_retirement_age = 60_000.0;
        plan.expenses.living = 20_000.0;
        plan.accounts = vec![Account::new("ira", AccountKind::TaxDeferred, 265_000.0)];
        plan.moves
            .push(enabled(MoveKind::RequiredMinimumDistributions, 73, None));
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.income.distributions, 10_000.0);
        assert_eq!(balance(year, "ira"), 255_000.0);
        assert_eq!(year.unallocated_cash, 10_000.0);
        assert_eq!(year.net_worth, 265_000.0);
        assert!(year.taxes.federal > 0.0);
    }

    #[test]
    fn foreign_pension_is_liquidated_at_retirement_with_haircut() {
        let mut plan = flat_plan(60, 62, 63);
        plan.accounts = vec![
            Account::new("overseas", AccountKind::ForeignPension, 100_000.0),
            Account::new("brokerage", AccountKind::Taxable, 10_000.0),
        ];
        plan.moves
            .push(enabled(MoveKind::ForeignPensionLiquidation, 0, None));
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(balance(&result.years[1], "overseas"), 100_000.0);
        let year = result.year(62).expect("age 62");
        assert_eq!(year.effects.foreign_pension_proceeds, 65_000.0);
        assert_eq!(balance(year, "overseas"), 0.0);
        assert_eq!(balance(year, "brokerage"), 75_000.0);
        assert_eq!(result.year(63).expect("age 63").effects.foreign_pension_proceeds, 0.0);
    }

    #[test]
    fn roth_401k_rolls_over_once_at_start_age() {
        let mut plan = flat_plan(60, 60, 62);
        plan.accounts = vec![
            Account::new("roth401k", AccountKind::Roth401k, 50_000.0),
            Account::new("rothira", AccountKind::TaxFree, 1_000.0),
        ];
        plan.moves.push(enabled(MoveKind::Roth401kRollover, 61, None));
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.years[0].effects.roth_401k_transfer, 0.0);
        let year = result.year(61).expect("age 61");
        assert_eq!(year.effects.roth_401k_transfer, 50_000.0);
        assert_eq!(balance(year, "roth401k"), 0.0);
        assert_eq!(balance(year, "rothira"), 51_000.0);
        assert_eq!(result.year(62).expect("age 62").effects.roth_401k_transfer, 0.0);
    }

    #[test]
    fn selling_home_adds_proceeds_and_ends_housing_cost() {
        let mut plan = flat_plan(60, 60, 63);
        plan.expenses.housing = 20_000.0;
        plan.accounts = vec![Account::new("brokerage", AccountKind::Taxable, 100_000.0)];
        plan.moves.push(enabled(MoveKind::SellHome, 62, None));
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.year(61).expect("age 61").expenses.housing, 20_000.0);
        let sale = result.year(62).expect("age 62");
        assert_eq!(sale.expenses.housing, 0.0);
        assert_eq!(sale.effects.windfall, 400_000.0);
        assert_eq!(result.year(63).expect("age 63").effects.windfall, 0.0);
        assert_eq!(result.year(63).expect("age 63").expenses.housing, 0.0);
    }

    #[test]
    fn college_tuition_is_paid_from_529_first() {
        let mut plan = flat_plan(50, 65, 50);
        plan.income.wages = 100_000.0;
        plan.accounts = vec![
            Account::new("529", AccountKind::Education, 20_000.0),
            Account::new("cash", AccountKind::Cash, 0.0),
        ];
        plan.moves.push(enabled(MoveKind::CollegeTuition, 50, Some(53)));
        let year = &simulate(&plan).expect("valid plan").years[0];
        assert_eq!(year.effects.education_withdrawal, 20_000.0);
        assert_eq!(year.expenses.education, 10_000.0);
        assert_eq!(balance(year, "529"), 0.0);
    }

    #[test]
    fn failing_years_are_recorded_and_the_projection_continues() {
        let mut plan = flat_plan(60, 60, 70);
        plan.expenses.living = 40_000.0;
        plan.accounts = vec![Account::new("cash", AccountKind::Cash, 50_000.0)];
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.years.len(), 11);
        assert_eq!(result.summary.first_failure_age, Some(61));
        for year in result.years.iter().skip(1) {
            assert_eq!(year.status, Status::Fail);
            assert!(year.net_worth <= 0.0);
            assert_eq!(year.unmet_shortfall, if year.age == 61 { 30_000.0 } else { 40_000.0 });
        }
    }

    #[test]
    fn shadow_tracks_match_base_without_deltas_and_straddle_it_with_them() {
        let mut plan = mid_career_plan();
        plan.sensitivity.bear_return_delta = 0.0;
        plan.sensitivity.bull_return_delta = 0.0;
        let flat = simulate(&plan).expect("valid plan");
        for year in &flat.years {
            assert_approx_tol(year.bear.net_worth, year.net_worth, 1.0);
            assert_approx_tol(year.bull.net_worth, year.net_worth, 1.0);
        }

        let spread = simulate(&mid_career_plan()).expect("valid plan");
        let at_60 = spread.year(60).expect("age 60");
        assert!(at_60.bear.net_worth < at_60.net_worth);
        assert!(at_60.bull.net_worth > at_60.net_worth);
    }

    #[test]
    fn simulating_twice_is_identical() {
        let mut plan = mid_career_plan();
        plan.moves = vec![
            enabled(MoveKind::RothConversion, 56, Some(64)),
            enabled(MoveKind::HsaMax, 41, None),
            enabled(MoveKind::RequiredMinimumDistributions, 73, None),
        ];
        assert_eq!(simulate(&plan), simulate(&plan));
    }

    #[test]
    fn claim_adjustment_matches_reduction_and_credit_schedule() {
        assert_approx_tol(claim_adjustment(62, 67), 0.70, 1e-12);
        assert_approx_tol(claim_adjustment(64, 67), 0.80, 1e-12);
        assert_approx_tol(claim_adjustment(67, 67), 1.0, 1e-12);
        assert_approx_tol(claim_adjustment(70, 67), 1.24, 1e-12);
        assert_approx_tol(claim_adjustment(72, 67), 1.24, 1e-12);
    }

    #[test]
    fn delay_move_pushes_claim_to_seventy() {
        let mut plan = flat_plan(66, 66, 70);
        plan.social_security.benefit_at_full_retirement_age = 30_000.0;
        plan.accounts = vec![Account::new("cash", AccountKind::Cash, 500_000.0)];
        plan.moves
            .push(enabled(MoveKind::DelaySocialSecurity, 0, None));
        let result = simulate(&plan).expect("valid plan");
        assert_eq!(result.year(69).expect("age 69").income.social_security, 0.0);
        assert_eq!(result.year(70).expect("age 70").income.social_security, 37_200.0);
    }

    #[test]
    fn contributions_without_income_or_cash_are_not_made() {
        let mut plan = flat_plan(40, 65, 44);
        let mut k401 = Account::new("401k", AccountKind::TaxDeferred, 0.0);
        k401.annual_contribution = 20_000.0;
        plan.accounts = vec![k401];
        let result = simulate(&plan).expect("valid plan");
        for year in &result.years {
            assert_eq!(year.contributions, 0.0, "age {}", year.age);
            assert_eq!(balance(year, "401k"), 0.0);
            assert_eq!(year.net_worth, 0.0);
            assert_eq!(year.unmet_shortfall, 0.0);
            assert_eq!(year.status, Status::Fail);
        }
    }

    #[test]
    fn contributions_are_capped_at_what_the_year_can_fund() {
        let mut plan = flat_plan(40, 65, 40);
        plan.income.wages = 50_000.0;
        plan.expenses.living = 30_000.0;
        let mut k401 = Account::new("401k", AccountKind::TaxDeferred, 0.0);
        k401.annual_contribution = 40_000.0;
        k401.employer_match = Some(EmployerMatch {
            rate: 1.0,
            wage_limit: 1.0,
        });
        plan.accounts = vec![k401, Account::new("cash", AccountKind::Cash, 5_000.0)];
        let year = &simulate(&plan).expect("valid plan").years[0];

        assert!(year.contributions > 15_000.0 && year.contributions < 40_000.0);
        assert_eq!(year.unmet_shortfall, 0.0);
        assert_eq!(balance(year, "cash"), 0.0);
        // Every contributed dollar came out of the year's cash flow or savings.
        assert_approx_tol(year.contributions, year.net_cash_flow + 5_000.0, 0.05);
        assert_approx_tol(year.employer_match, year.contributions, 0.05);
        assert_approx_tol(balance(year, "401k"), 2.0 * year.contributions, 0.05);
    }

    #[test]
    fn full_retirement_age_outside_range_is_rejected() {
        let mut plan = flat_plan(60, 62, 80);
        plan.social_security.full_retirement_age = 400_000_000;
        assert!(matches!(simulate(&plan), Err(PlanError::InvalidAge { .. })));
        plan.social_security.full_retirement_age = 61;
        assert!(matches!(simulate(&plan), Err(PlanError::InvalidAge { .. })));
        plan.social_security.full_retirement_age = 67;
        assert!(simulate(&plan).is_ok());
        assert_approx_tol(claim_adjustment(0, u32::MAX), 0.0, 1e-12);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_full_horizon_and_fail_means_non_positive_net_worth(
            current in 25u32..70,
            to_retirement in 0u32..25,
            to_terminal in 0u32..40,
            cash in 0u32..200_000,
            deferred in 0u32..800_000,
            wages in 0u32..250_000,
            living in 0u32..120_000,
        ) {
            let mut plan = Plan::new(current, current + to_retirement);
            plan.personal.terminal_age = (current + to_terminal).min(MAX_TERMINAL_AGE);
            plan.income.wages = wages as f64;
            plan.expenses.living = living as f64;
            plan.accounts = vec![
                Account::new("cash", AccountKind::Cash, cash as f64),
                Account::new("ira", AccountKind::TaxDeferred, deferred as f64),
            ];
            let result = simulate(&plan).expect("valid plan");
            prop_assert_eq!(result.years.len(), plan.horizon_years());
            for (i, year) in result.years.iter().enumerate() {
                prop_assert_eq!(year.age, current + i as u32);
                prop_assert_eq!(year.status.is_fail(), year.net_worth <= 0.0);
                prop_assert_eq!(year.bear.status.is_fail(), year.bear.net_worth <= 0.0);
                prop_assert!(year.balances.iter().all(|b| b.balance >= 0.0));
            }
        }
    }
}
