use super::ledger::Ledger;
use super::tax::{TaxAssessment, TaxInput, assess};
use super::types::AccountKind;

/// Stop once the uncovered tax on the latest draw is below one currency unit.
pub const TAX_TOLERANCE: f64 = 1.0;
pub const MAX_ITERATIONS: u32 = 5;
const MAX_GROSS_UP_RATE: f64 = 0.9;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tier {
    Taxable,
    TaxDeferred,
    TaxFree,
}

impl Tier {
    pub fn of(kind: AccountKind) -> Option<Tier> {
        match kind {
            AccountKind::Cash | AccountKind::Taxable => Some(Tier::Taxable),
            AccountKind::TaxDeferred => Some(Tier::TaxDeferred),
            AccountKind::TaxFree | AccountKind::Roth401k | AccountKind::Hsa => Some(Tier::TaxFree),
            AccountKind::Education | AccountKind::ForeignPension => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WithdrawalOrder {
    /// Brokerage, then tax-deferred, then tax-free.
    TaxEfficient,
    DeferredFirst,
    RothBeforeDeferred,
    Proportional,
}

impl WithdrawalOrder {
    fn tiers(self) -> [Tier; 3] {
        match self {
            WithdrawalOrder::TaxEfficient | WithdrawalOrder::Proportional => {
                [Tier::Taxable, Tier::TaxDeferred, Tier::TaxFree]
            }
            WithdrawalOrder::DeferredFirst => [Tier::TaxDeferred, Tier::Taxable, Tier::TaxFree],
            WithdrawalOrder::RothBeforeDeferred => {
                [Tier::Taxable, Tier::TaxFree, Tier::TaxDeferred]
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct WithdrawalRequest {
    /// expenses + tax - income, before any draw.
    pub shortfall: f64,
    /// The year's income shape without the draws.
    pub base: TaxInput,
    pub order: WithdrawalOrder,
    /// Share of a brokerage sale that is taxable gain.
    pub gain_fraction: f64,
    pub penalize_deferred: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalOutcome {
    /// Gross amount removed from accounts and kept.
    pub withdrawn: f64,
    pub by_slot: Vec<f64>,
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub early_distributions: f64,
    pub assessment: TaxAssessment,
    pub additional_tax: f64,
    pub unmet: f64,
    pub iterations: u32,
    pub converged: bool,
}

impl WithdrawalOutcome {
    fn empty(slots: usize, assessment: TaxAssessment) -> Self {
        Self {
            withdrawn: 0.0,
            by_slot: vec![0.0; slots],
            ordinary_income: 0.0,
            capital_gains: 0.0,
            early_distributions: 0.0,
            assessment,
            additional_tax: 0.0,
            unmet: 0.0,
            iterations: 0,
            converged: true,
        }
    }

    fn record(&mut self, ledger: &Ledger, slot: usize, amount: f64, request: &WithdrawalRequest) {
        self.by_slot[slot] += amount;
        self.withdrawn += amount;
        match ledger.kind(slot) {
            AccountKind::Taxable => {
                self.capital_gains += amount * request.gain_fraction.clamp(0.0, 1.0);
            }
            AccountKind::TaxDeferred => {
                self.ordinary_income += amount;
                if request.penalize_deferred {
                    self.early_distributions += amount;
                }
            }
            _ => {}
        }
    }

    fn taxed_input(&self, base: TaxInput) -> TaxInput {
        base.with_additional(
            self.ordinary_income,
            self.capital_gains,
            self.early_distributions,
        )
    }
}

/// Covers a retirement-year shortfall from the ledger.
///
/// Each draw can raise the year's tax, which raises what still has to be
/// drawn. The loop redraws the uncovered amount, grossed up by the
/// incremental rate the previous draw revealed, until the uncovered amount
/// drops below [`TAX_TOLERANCE`] or [`MAX_ITERATIONS`] is reached. Anything
/// left once the eligible accounts are empty is reported as `unmet`.
pub fn cover_shortfall(ledger: &mut Ledger, request: &WithdrawalRequest) -> WithdrawalOutcome {
    sequence(ledger, request, MAX_ITERATIONS)
}

fn sequence(
    ledger: &mut Ledger,
    request: &WithdrawalRequest,
    max_passes: u32,
) -> WithdrawalOutcome {
    let base_assessment = assess(&request.base);
    let base_total = base_assessment.total();
    let mut outcome = WithdrawalOutcome::empty(ledger.len(), base_assessment);
    if request.shortfall <= 0.0 {
        return outcome;
    }

    let mut remaining = request.shortfall;
    let mut rate = 0.0;
    let mut extra_tax = 0.0;
    outcome.converged = false;

    let mut exhausted = false;
    while outcome.iterations < max_passes {
        outcome.iterations += 1;
        let wanted = remaining / (1.0 - rate);
        let got = draw(ledger, wanted, request, &mut outcome);

        let assessment = assess(&outcome.taxed_input(request.base));
        let new_extra = (assessment.total() - base_total).max(0.0);
        if got > 0.0 {
            rate = ((new_extra - extra_tax) / got).clamp(0.0, MAX_GROSS_UP_RATE);
        }
        extra_tax = new_extra;
        outcome.assessment = assessment;
        remaining = request.shortfall + extra_tax - outcome.withdrawn;

        if got + 1e-9 < wanted {
            exhausted = true;
            break;
        }
        if remaining < TAX_TOLERANCE {
            outcome.converged = true;
            break;
        }
    }

    if !outcome.converged && !exhausted && remaining > 0.0 {
        // Out of passes with money still in the accounts: take the rest as is.
        draw(ledger, remaining, request, &mut outcome);
        let assessment = assess(&outcome.taxed_input(request.base));
        extra_tax = (assessment.total() - base_total).max(0.0);
        outcome.assessment = assessment;
        remaining = request.shortfall + extra_tax - outcome.withdrawn;
        outcome.converged = remaining < TAX_TOLERANCE;
    }

    if remaining < 0.0 {
        // Grossed up by a rate the later tier did not charge; hand the excess back.
        let excess = -remaining;
        ledger.deposit_liquid(excess);
        outcome.withdrawn -= excess;
        remaining = 0.0;
    }

    outcome.additional_tax = extra_tax;
    outcome.unmet = if outcome.converged { 0.0 } else { remaining.max(0.0) };
    tracing::trace!(
        shortfall = request.shortfall,
        withdrawn = outcome.withdrawn,
        additional_tax = extra_tax,
        unmet = outcome.unmet,
        iterations = outcome.iterations,
        "withdrawal sequenced"
    );
    outcome
}

fn draw(
    ledger: &mut Ledger,
    amount: f64,
    request: &WithdrawalRequest,
    outcome: &mut WithdrawalOutcome,
) -> f64 {
    if amount <= 0.0 {
        return 0.0;
    }
    match request.order {
        WithdrawalOrder::Proportional => draw_pro_rata(ledger, amount, request, outcome),
        order => {
            let mut remaining = amount;
            for tier in order.tiers() {
                for slot in tier_slots(ledger, tier) {
                    if remaining <= 0.0 {
                        break;
                    }
                    let taken = ledger.debit(slot, remaining);
                    if taken > 0.0 {
                        outcome.record(ledger, slot, taken, request);
                        remaining -= taken;
                    }
                }
            }
            amount - remaining
        }
    }
}

fn draw_pro_rata(
    ledger: &mut Ledger,
    amount: f64,
    request: &WithdrawalRequest,
    outcome: &mut WithdrawalOutcome,
) -> f64 {
    let slots: Vec<usize> = [Tier::Taxable, Tier::TaxDeferred, Tier::TaxFree]
        .into_iter()
        .flat_map(|tier| tier_slots(ledger, tier))
        .collect();
    let available: f64 = slots.iter().map(|&slot| ledger.balance(slot)).sum();
    if available <= 0.0 {
        return 0.0;
    }
    let share = (amount / available).min(1.0);
    let mut total = 0.0;
    for slot in slots {
        let taken = ledger.debit(slot, ledger.balance(slot) * share);
        if taken > 0.0 {
            outcome.record(ledger, slot, taken, request);
            total += taken;
        }
    }
    total
}

/// Slots of a tier; cash-like slots come before brokerage.
fn tier_slots(ledger: &Ledger, tier: Tier) -> Vec<usize> {
    let mut slots: Vec<usize> = (0..ledger.len())
        .filter(|&slot| Tier::of(ledger.kind(slot)) == Some(tier))
        .collect();
    slots.sort_by_key(|&slot| !ledger.kind(slot).is_cash_like());
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Account, FilingStatus, Phase};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn retired_input(ordinary: f64) -> TaxInput {
        let mut input = TaxInput::new(FilingStatus::Single, 70, Phase::Retired);
        input.ordinary_income = ordinary;
        input
    }

    fn request(shortfall: f64, base: TaxInput, order: WithdrawalOrder) -> WithdrawalRequest {
        WithdrawalRequest {
            shortfall,
            base,
            order,
            gain_fraction: 0.5,
            penalize_deferred: false,
        }
    }

    fn ledger(taxable: f64, deferred: f64, roth: f64) -> Ledger {
        Ledger::from_accounts(&[
            Account::new("brokerage", AccountKind::Taxable, taxable),
            Account::new("ira", AccountKind::TaxDeferred, deferred),
            Account::new("roth", AccountKind::TaxFree, roth),
        ])
    }

    #[test]
    fn no_shortfall_draws_nothing() {
        let mut l = ledger(1_000.0, 1_000.0, 1_000.0);
        let req = request(0.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        let out = cover_shortfall(&mut l, &req);
        assert_eq!(out.withdrawn, 0.0);
        assert_eq!(out.iterations, 0);
        assert!(out.converged);
        assert_eq!(l.total(), 3_000.0);
    }

    #[test]
    fn brokerage_inside_zero_gains_bracket_needs_one_pass() {
        let mut l = ledger(100_000.0, 50_000.0, 50_000.0);
        let req = request(30_000.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        let out = cover_shortfall(&mut l, &req);
        assert!(out.converged);
        assert_eq!(out.iterations, 1);
        assert_approx_tol(out.withdrawn, 30_000.0, 1e-9);
        assert_approx_tol(out.by_slot[0], 30_000.0, 1e-9);
        assert_approx_tol(out.additional_tax, 0.0, 1e-9);
    }

    #[test]
    fn deferred_draw_grosses_up_for_its_own_tax() {
        let mut l = ledger(0.0, 500_000.0, 0.0);
        // 63,000 taxable already puts the next dollars in the 22% bracket.
        let req = request(20_000.0, retired_input(80_000.0), WithdrawalOrder::TaxEfficient);
        let out = cover_shortfall(&mut l, &req);
        assert!(out.converged, "{out:?}");
        assert!(out.iterations <= MAX_ITERATIONS);
        assert_approx_tol(out.withdrawn - out.additional_tax, 20_000.0, TAX_TOLERANCE);
        assert_approx_tol(out.withdrawn, 20_000.0 / 0.78, 2.0);
        assert_eq!(out.unmet, 0.0);
    }

    #[test]
    fn exhausted_accounts_leave_shortfall_unmet() {
        let mut l = ledger(1_000.0, 0.0, 2_000.0);
        let req = request(10_000.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        let out = cover_shortfall(&mut l, &req);
        assert!(!out.converged);
        assert_approx_tol(out.withdrawn, 3_000.0, 1e-9);
        assert_approx_tol(out.unmet, 7_000.0, 1e-6);
        assert_approx_tol(l.total(), 0.0, 1e-9);
    }

    #[test]
    fn default_order_saves_tax_free_for_last() {
        let mut l = ledger(5_000.0, 5_000.0, 5_000.0);
        let req = request(8_000.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        let out = cover_shortfall(&mut l, &req);
        assert_approx_tol(out.by_slot[0], 5_000.0, 1e-9);
        assert_approx_tol(out.by_slot[1], 3_000.0, 1e-9);
        assert_approx_tol(out.by_slot[2], 0.0, 1e-9);
    }

    #[test]
    fn roth_before_deferred_skips_the_deferred_tier() {
        let mut l = ledger(1_000.0, 5_000.0, 5_000.0);
        let req = request(4_000.0, retired_input(0.0), WithdrawalOrder::RothBeforeDeferred);
        let out = cover_shortfall(&mut l, &req);
        assert_approx_tol(out.by_slot[0], 1_000.0, 1e-9);
        assert_approx_tol(out.by_slot[1], 0.0, 1e-9);
        assert_approx_tol(out.by_slot[2], 3_000.0, 1e-9);
    }

    #[test]
    fn proportional_draws_by_balance_share() {
        let mut l = ledger(10_000.0, 30_000.0, 60_000.0);
        let req = request(10_000.0, retired_input(0.0), WithdrawalOrder::Proportional);
        let out = cover_shortfall(&mut l, &req);
        assert_approx_tol(out.by_slot[0], 1_000.0, 1e-6);
        assert_approx_tol(out.by_slot[1], 3_000.0, 1e-6);
        assert_approx_tol(out.by_slot[2], 6_000.0, 1e-6);
    }

    #[test]
    fn early_deferred_draws_pay_penalty() {
        let mut l = ledger(0.0, 100_000.0, 0.0);
        let mut req = request(10_000.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        req.base.age = 52;
        req.penalize_deferred = true;
        let out = cover_shortfall(&mut l, &req);
        assert!(out.converged);
        assert!(out.assessment.early_withdrawal_penalty > 1_000.0);
        assert_approx_tol(out.withdrawn - out.additional_tax, 10_000.0, TAX_TOLERANCE);
    }

    #[test]
    fn overshoot_is_returned_to_liquid_account() {
        // The brokerage draw reveals a gains rate, then the tax-free tier charges none.
        let mut l = ledger(20_000.0, 0.0, 100_000.0);
        let mut base = retired_input(120_000.0);
        base.capital_gains = 0.0;
        let out = cover_shortfall(&mut l, &request(30_000.0, base, WithdrawalOrder::TaxEfficient));
        assert!(out.converged);
        assert!(out.withdrawn - out.additional_tax >= 30_000.0 - TAX_TOLERANCE);
        assert!(out.withdrawn - out.additional_tax <= 30_000.0 + 1e-6);
        assert_approx_tol(l.total(), 120_000.0 - out.withdrawn, 1e-6);
    }

    #[test]
    fn running_out_of_passes_still_draws_the_leftover() {
        let mut l = ledger(0.0, 500_000.0, 0.0);
        let req = request(30_000.0, retired_input(0.0), WithdrawalOrder::TaxEfficient);
        let out = sequence(&mut l, &req, 1);
        assert_eq!(out.iterations, 1);
        // One ungrossed pass leaves about 1,300 of tax; the final draw covers it.
        assert!(out.withdrawn > 31_000.0, "{out:?}");
        assert!(out.unmet < 200.0, "{out:?}");
        assert_approx_tol(out.withdrawn - out.additional_tax + out.unmet, 30_000.0, 1e-6);
        assert_approx_tol(l.total(), 500_000.0 - out.withdrawn, 1e-6);
    }
}
