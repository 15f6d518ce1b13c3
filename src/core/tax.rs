use super::types::{FilingStatus, Phase, TaxBreakdown};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bracket {
    pub floor: f64,
    pub rate: f64,
}

const fn b(floor: f64, rate: f64) -> Bracket {
    Bracket { floor, rate }
}

// 2025 federal ordinary-income brackets.
const SINGLE: [Bracket; 7] = [
    b(0.0, 0.10),
    b(11_925.0, 0.12),
    b(48_475.0, 0.22),
    b(103_350.0, 0.24),
    b(197_300.0, 0.32),
    b(250_525.0, 0.35),
    b(626_350.0, 0.37),
];
const MARRIED_JOINT: [Bracket; 7] = [
    b(0.0, 0.10),
    b(23_850.0, 0.12),
    b(96_950.0, 0.22),
    b(206_700.0, 0.24),
    b(394_600.0, 0.32),
    b(501_050.0, 0.35),
    b(751_600.0, 0.37),
];
const MARRIED_SEPARATE: [Bracket; 7] = [
    b(0.0, 0.10),
    b(11_925.0, 0.12),
    b(48_475.0, 0.22),
    b(103_350.0, 0.24),
    b(197_300.0, 0.32),
    b(250_525.0, 0.35),
    b(375_800.0, 0.37),
];
const HEAD_OF_HOUSEHOLD: [Bracket; 7] = [
    b(0.0, 0.10),
    b(17_000.0, 0.12),
    b(64_850.0, 0.22),
    b(103_350.0, 0.24),
    b(197_300.0, 0.32),
    b(250_500.0, 0.35),
    b(626_350.0, 0.37),
];

// Long-term capital gains, stacked on top of ordinary taxable income.
const CG_SINGLE: [Bracket; 3] = [b(0.0, 0.0), b(48_350.0, 0.15), b(533_400.0, 0.20)];
const CG_MARRIED_JOINT: [Bracket; 3] = [b(0.0, 0.0), b(96_700.0, 0.15), b(600_050.0, 0.20)];
const CG_MARRIED_SEPARATE: [Bracket; 3] = [b(0.0, 0.0), b(48_350.0, 0.15), b(300_000.0, 0.20)];
const CG_HEAD_OF_HOUSEHOLD: [Bracket; 3] = [b(0.0, 0.0), b(64_750.0, 0.15), b(566_700.0, 0.20)];

const SOCIAL_SECURITY_RATE: f64 = 0.062;
const SOCIAL_SECURITY_WAGE_BASE: f64 = 176_100.0;
const MEDICARE_RATE: f64 = 0.0145;
const ADDITIONAL_MEDICARE_RATE: f64 = 0.009;
const EARLY_DISTRIBUTION_PENALTY: f64 = 0.10;

pub fn ordinary_brackets(status: FilingStatus) -> &'static [Bracket] {
    match status {
        FilingStatus::Single => &SINGLE,
        FilingStatus::MarriedFilingJointly => &MARRIED_JOINT,
        FilingStatus::MarriedFilingSeparately => &MARRIED_SEPARATE,
        FilingStatus::HeadOfHousehold => &HEAD_OF_HOUSEHOLD,
    }
}

pub fn capital_gains_brackets(status: FilingStatus) -> &'static [Bracket] {
    match status {
        FilingStatus::Single => &CG_SINGLE,
        FilingStatus::MarriedFilingJointly => &CG_MARRIED_JOINT,
        FilingStatus::MarriedFilingSeparately => &CG_MARRIED_SEPARATE,
        FilingStatus::HeadOfHousehold => &CG_HEAD_OF_HOUSEHOLD,
    }
}

pub fn standard_deduction(status: FilingStatus, age: u32, index: f64) -> f64 {
    let (base, senior) = match status {
        FilingStatus::Single => (15_000.0, 2_000.0),
        FilingStatus::HeadOfHousehold => (22_500.0, 2_000.0),
        // Both spouses are assumed to share the household age.
        FilingStatus::MarriedFilingJointly => (30_000.0, 3_200.0),
        FilingStatus::MarriedFilingSeparately => (15_000.0, 1_600.0),
    };
    let extra = if age >= 65 { senior } else { 0.0 };
    (base + extra) * index
}

/// Tax on `income` computed segment by segment.
pub fn progressive_tax(income: f64, brackets: &[Bracket], index: f64) -> f64 {
    let income = income.max(0.0);
    let mut tax = 0.0;
    for (i, bracket) in brackets.iter().enumerate() {
        let floor = bracket.floor * index;
        if income <= floor {
            break;
        }
        let ceiling = brackets
            .get(i + 1)
            .map(|next| next.floor * index)
            .unwrap_or(f64::INFINITY);
        tax += (income.min(ceiling) - floor) * bracket.rate;
    }
    tax
}

/// Rate applied to the next dollar above `income`.
pub fn marginal_rate(income: f64, brackets: &[Bracket], index: f64) -> f64 {
    let income = income.max(0.0);
    brackets
        .iter()
        .rev()
        .find(|bracket| income >= bracket.floor * index)
        .map(|bracket| bracket.rate)
        .unwrap_or(0.0)
}

/// Top of the ordinary bracket taxed at `rate`, in taxable-income terms.
/// `None` when no bracket has that rate or it is the open-ended top one.
pub fn bracket_ceiling(status: FilingStatus, rate: f64, index: f64) -> Option<f64> {
    let brackets = ordinary_brackets(status);
    let pos = brackets
        .iter()
        .position(|bracket| (bracket.rate - rate).abs() < 1e-9)?;
    brackets.get(pos + 1).map(|next| next.floor * index)
}

/// Tax on gains that sit on top of `ordinary_taxable` in the gains brackets.
fn stacked_gains_tax(ordinary_taxable: f64, gains: f64, brackets: &[Bracket], index: f64) -> f64 {
    let bottom = ordinary_taxable.max(0.0);
    let top = bottom + gains.max(0.0);
    let mut tax = 0.0;
    for (i, bracket) in brackets.iter().enumerate() {
        let floor = bracket.floor * index;
        let ceiling = brackets
            .get(i + 1)
            .map(|next| next.floor * index)
            .unwrap_or(f64::INFINITY);
        let overlap = top.min(ceiling) - bottom.max(floor);
        if overlap > 0.0 {
            tax += overlap * bracket.rate;
        }
    }
    tax
}

/// Portion of a Social Security benefit subject to income tax, from the
/// combined-income rule. Never more than 85% of the benefit.
pub fn taxable_social_security(benefit: f64, other_income: f64, status: FilingStatus) -> f64 {
    let benefit = benefit.max(0.0);
    if benefit <= 0.0 {
        return 0.0;
    }
    let (base, adjusted_base) = match status {
        FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        FilingStatus::MarriedFilingSeparately => (0.0, 0.0),
        FilingStatus::Single | FilingStatus::HeadOfHousehold => (25_000.0, 34_000.0),
    };
    let provisional = other_income.max(0.0) + 0.5 * benefit;
    let taxable = if provisional <= base {
        0.0
    } else if provisional <= adjusted_base {
        (0.5 * (provisional - base)).min(0.5 * benefit)
    } else {
        let first_tier = (0.5 * (adjusted_base - base)).min(0.5 * benefit);
        0.85 * (provisional - adjusted_base) + first_tier
    };
    taxable.min(0.85 * benefit)
}

pub fn payroll_tax(wages: f64, status: FilingStatus, index: f64) -> f64 {
    let wages = wages.max(0.0);
    let additional_threshold = match status {
        FilingStatus::MarriedFilingJointly => 250_000.0,
        FilingStatus::MarriedFilingSeparately => 125_000.0,
        FilingStatus::Single | FilingStatus::HeadOfHousehold => 200_000.0,
    };
    wages.min(SOCIAL_SECURITY_WAGE_BASE * index) * SOCIAL_SECURITY_RATE
        + wages * MEDICARE_RATE
        + (wages - additional_threshold).max(0.0) * ADDITIONAL_MEDICARE_RATE
}

/// One year's income shape.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaxInput {
    /// Earned income subject to payroll tax.
    pub wages: f64,
    /// Ordinary income other than Social Security, after pre-tax deferrals.
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub social_security: f64,
    /// Tax-deferred distributions subject to the early-distribution penalty.
    pub early_distributions: f64,
    pub filing_status: FilingStatus,
    pub state_rate: f64,
    pub age: u32,
    pub phase: Phase,
    /// Cumulative inflation applied to thresholds.
    pub index: f64,
}

impl TaxInput {
    pub fn new(filing_status: FilingStatus, age: u32, phase: Phase) -> Self {
        Self {
            wages: 0.0,
            ordinary_income: 0.0,
            capital_gains: 0.0,
            social_security: 0.0,
            early_distributions: 0.0,
            filing_status,
            state_rate: 0.0,
            age,
            phase,
            index: 1.0,
        }
    }

    pub fn with_additional(self, ordinary: f64, gains: f64, early: f64) -> Self {
        Self {
            ordinary_income: self.ordinary_income + ordinary,
            capital_gains: self.capital_gains + gains,
            early_distributions: self.early_distributions + early,
            ..self
        }
    }
}

/// Unrounded result of [`assess`]. Rounded only via [`TaxAssessment::breakdown`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxAssessment {
    pub federal: f64,
    pub state: f64,
    pub payroll: f64,
    pub capital_gains: f64,
    pub early_withdrawal_penalty: f64,
    pub taxable_social_security: f64,
    pub ordinary_taxable_income: f64,
    pub marginal_ordinary_rate: f64,
    pub marginal_capital_gains_rate: f64,
}

impl TaxAssessment {
    pub fn total(&self) -> f64 {
        self.federal
            + self.state
            + self.payroll
            + self.capital_gains
            + self.early_withdrawal_penalty
    }

    pub fn breakdown(&self) -> TaxBreakdown {
        TaxBreakdown {
            federal: round_money(self.federal),
            state: round_money(self.state),
            payroll: round_money(self.payroll),
            capital_gains: round_money(self.capital_gains),
            early_withdrawal_penalty: round_money(self.early_withdrawal_penalty),
            taxable_social_security: round_money(self.taxable_social_security),
            marginal_ordinary_rate: self.marginal_ordinary_rate,
            marginal_capital_gains_rate: self.marginal_capital_gains_rate,
            total: round_money(self.total()),
        }
    }
}

pub fn assess(input: &TaxInput) -> TaxAssessment {
    let status = input.filing_status;
    let index = if input.index.is_finite() && input.index > 0.0 {
        input.index
    } else {
        1.0
    };
    let ordinary = input.ordinary_income.max(0.0);
    let gains = input.capital_gains.max(0.0);
    let benefit = input.social_security.max(0.0);

    let taxable_ss = taxable_social_security(benefit, ordinary + gains, status);
    let deduction = standard_deduction(status, input.age, index);

    // The deduction is used up by ordinary income before it reaches gains.
    let ordinary_taxable = (ordinary + taxable_ss - deduction).max(0.0);
    let leftover_deduction = (deduction - ordinary - taxable_ss).max(0.0);
    let gains_taxable = (gains - leftover_deduction).max(0.0);

    let ordinary_table = ordinary_brackets(status);
    let gains_table = capital_gains_brackets(status);

    let federal = progressive_tax(ordinary_taxable, ordinary_table, index);
    let capital_gains = stacked_gains_tax(ordinary_taxable, gains_taxable, gains_table, index);
    let state = input.state_rate.clamp(0.0, 1.0) * (ordinary + gains - deduction).max(0.0);
    let payroll = match input.phase {
        Phase::Working => payroll_tax(input.wages, status, index),
        Phase::Retired => 0.0,
    };
    let early_withdrawal_penalty = input.early_distributions.max(0.0) * EARLY_DISTRIBUTION_PENALTY;

    TaxAssessment {
        federal,
        state,
        payroll,
        capital_gains,
        early_withdrawal_penalty,
        taxable_social_security: taxable_ss,
        ordinary_taxable_income: ordinary_taxable,
        marginal_ordinary_rate: marginal_rate(ordinary_taxable, ordinary_table, index),
        marginal_capital_gains_rate: marginal_rate(
            ordinary_taxable + gains_taxable,
            gains_table,
            index,
        ),
    }
}

/// Whole currency units, without negative zero.
pub fn round_money(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let rounded = value.round();
    if rounded == 0.0 { 0.0 } else { rounded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn working(status: FilingStatus) -> TaxInput {
        TaxInput::new(status, 45, Phase::Working)
    }

    #[test]
    fn married_joint_brackets_apply_segment_by_segment() {
        // 23,850 * 10% + 73,100 * 12% + 3,050 * 22%
        let brackets = ordinary_brackets(FilingStatus::MarriedFilingJointly);
        let tax = progressive_tax(100_000.0, brackets, 1.0);
        assert_approx(tax, 2_385.0 + 8_772.0 + 671.0);
    }

    #[test]
    fn marginal_rate_reports_next_dollar() {
        let table = ordinary_brackets(FilingStatus::MarriedFilingJointly);
        assert_approx(marginal_rate(206_699.0, table, 1.0), 0.22);
        assert_approx(marginal_rate(206_700.0, table, 1.0), 0.24);
        assert_approx(marginal_rate(0.0, table, 1.0), 0.10);
    }

    #[test]
    fn indexing_scales_thresholds() {
        let table = ordinary_brackets(FilingStatus::Single);
        let today = progressive_tax(50_000.0, table, 1.0);
        let later = progressive_tax(100_000.0, table, 2.0);
        assert_approx(later, today * 2.0);
    }

    #[test]
    fn standard_deduction_adds_senior_amount() {
        assert_approx(standard_deduction(FilingStatus::MarriedFilingJointly, 64, 1.0), 30_000.0);
        assert_approx(standard_deduction(FilingStatus::MarriedFilingJointly, 65, 1.0), 33_200.0);
        assert_approx(standard_deduction(FilingStatus::Single, 70, 1.0), 17_000.0);
    }

    #[test]
    fn social_security_taxability_tiers() {
        assert_approx(taxable_social_security(20_000.0, 10_000.0, FilingStatus::Single), 0.0);
        // provisional 30,000: half of the excess over 25,000
        assert_approx(taxable_social_security(20_000.0, 20_000.0, FilingStatus::Single), 2_500.0);
        // provisional 40,000: 0.85 * 6,000 + 4,500
        assert_approx(taxable_social_security(20_000.0, 30_000.0, FilingStatus::Single), 9_600.0);
        assert_approx(
            taxable_social_security(30_000.0, 500_000.0, FilingStatus::MarriedFilingJointly),
            25_500.0,
        );
    }

    #[test]
    fn payroll_caps_social_security_and_adds_medicare_surtax() {
        assert_approx(
            payroll_tax(200_000.0, FilingStatus::Single, 1.0),
            176_100.0 * 0.062 + 200_000.0 * 0.0145,
        );
        assert_approx(
            payroll_tax(250_000.0, FilingStatus::Single, 1.0),
            176_100.0 * 0.062 + 250_000.0 * 0.0145 + 50_000.0 * 0.009,
        );
    }

    #[test]
    fn payroll_applies_only_in_working_years() {
        let mut input = working(FilingStatus::Single);
        input.wages = 50_000.0;
        input.ordinary_income = 50_000.0;
        assert!(assess(&input).payroll > 0.0);
        input.phase = Phase::Retired;
        assert_approx(assess(&input).payroll, 0.0);
    }

    #[test]
    fn gains_inside_zero_bracket_are_untaxed() {
        let mut input = working(FilingStatus::Single);
        input.ordinary_income = 15_000.0;
        input.capital_gains = 40_000.0;
        let tax = assess(&input);
        assert_approx(tax.federal, 0.0);
        assert_approx(tax.capital_gains, 0.0);
    }

    #[test]
    fn gains_stack_on_top_of_ordinary_income() {
        let mut input = working(FilingStatus::Single);
        input.ordinary_income = 100_000.0;
        input.capital_gains = 10_000.0;
        let tax = assess(&input);
        assert_approx(tax.capital_gains, 1_500.0);
        assert_approx(tax.marginal_capital_gains_rate, 0.15);
        assert_approx(tax.ordinary_taxable_income, 85_000.0);
    }

    #[test]
    fn gains_straddling_the_zero_bracket_are_split() {
        let mut input = working(FilingStatus::Single);
        input.ordinary_income = 55_000.0; // 40,000 taxable
        input.capital_gains = 20_000.0; // 8,350 at 0%, 11,650 at 15%
        assert_approx(assess(&input).capital_gains, 11_650.0 * 0.15);
    }

    #[test]
    fn state_tax_uses_flat_rate_after_deduction() {
        let mut input = working(FilingStatus::Single);
        input.ordinary_income = 65_000.0;
        input.state_rate = 0.05;
        assert_approx(assess(&input).state, 2_500.0);
    }

    #[test]
    fn negative_inputs_are_clamped() {
        let mut input = working(FilingStatus::HeadOfHousehold);
        input.wages = -5_000.0;
        input.ordinary_income = -10_000.0;
        input.capital_gains = -1.0;
        input.social_security = -3.0;
        let tax = assess(&input);
        assert_approx(tax.total(), 0.0);
    }

    #[test]
    fn early_distributions_carry_penalty() {
        let mut input = working(FilingStatus::Single);
        input.early_distributions = 10_000.0;
        assert_approx(assess(&input).early_withdrawal_penalty, 1_000.0);
    }

    #[test]
    fn breakdown_is_rounded_to_whole_units() {
        let mut input = working(FilingStatus::Single);
        input.wages = 83_333.33;
        input.ordinary_income = 83_333.33;
        input.state_rate = 0.0307;
        let breakdown = assess(&input).breakdown();
        for value in [
            breakdown.federal,
            breakdown.state,
            breakdown.payroll,
            breakdown.capital_gains,
            breakdown.total,
        ] {
            assert_eq!(value, value.round());
        }
    }

    #[test]
    fn bracket_ceiling_finds_top_of_rate() {
        assert_eq!(
            bracket_ceiling(FilingStatus::MarriedFilingJointly, 0.22, 1.0),
            Some(206_700.0)
        );
        assert_eq!(bracket_ceiling(FilingStatus::Single, 0.37, 1.0), None);
        assert_eq!(bracket_ceiling(FilingStatus::Single, 0.5, 1.0), None);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_tax_is_non_negative_and_monotone_in_ordinary_income(
            base in 0u32..900_000,
            extra in 0u32..200_000,
            gains in 0u32..300_000,
            ss in 0u32..60_000,
            status_idx in 0usize..4,
            age in 18u32..95,
        ) {
            let status = [
                FilingStatus::Single,
                FilingStatus::MarriedFilingJointly,
                FilingStatus::MarriedFilingSeparately,
                FilingStatus::HeadOfHousehold,
            ][status_idx];
            let mut low = TaxInput::new(status, age, Phase::Retired);
            low.ordinary_income = base as f64;
            low.capital_gains = gains as f64;
            low.social_security = ss as f64;
            low.state_rate = 0.05;
            let high = low.with_additional(extra as f64, 0.0, 0.0);

            let low_tax = assess(&low);
            let high_tax = assess(&high);
            prop_assert!(low_tax.total() >= 0.0);
            prop_assert!(high_tax.total() + 1e-6 >= low_tax.total());
            prop_assert!(high_tax.total() - low_tax.total() <= extra as f64 + 1e-6);
            prop_assert!(low_tax.marginal_ordinary_rate < 1.0);
        }
    }
}
