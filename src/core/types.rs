use serde::{Deserialize, Serialize};

use super::migrate::CURRENT_SCHEMA_VERSION;
use super::moves::Move;

pub const DEFAULT_TERMINAL_AGE: u32 = 80;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    Cash,
    Taxable,
    TaxDeferred,
    TaxFree,
    Roth401k,
    Hsa,
    Education,
    ForeignPension,
}

impl AccountKind {
    /// Employee deferrals into these kinds reduce ordinary taxable income.
    pub fn is_pre_tax(self) -> bool {
        matches!(self, AccountKind::TaxDeferred | AccountKind::Hsa)
    }

    pub fn is_cash_like(self) -> bool {
        matches!(self, AccountKind::Cash)
    }

    pub fn accepts_contributions(self) -> bool {
        !matches!(self, AccountKind::ForeignPension)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Working,
    Retired,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Fail,
}

impl Status {
    pub fn from_net_worth(net_worth: f64) -> Self {
        if net_worth <= 0.0 {
            Status::Fail
        } else {
            Status::Ok
        }
    }

    pub fn is_fail(self) -> bool {
        self == Status::Fail
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personal {
    pub current_age: u32,
    pub retirement_age: u32,
    #[serde(default = "default_terminal_age")]
    pub terminal_age: u32,
    #[serde(default = "default_filing_status")]
    pub filing_status: FilingStatus,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub dependents: u32,
    /// Age at which dependent costs stop.
    #[serde(default)]
    pub dependents_until_age: Option<u32>,
}

fn default_terminal_age() -> u32 {
    DEFAULT_TERMINAL_AGE
}

fn default_filing_status() -> FilingStatus {
    FilingStatus::Single
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeSettings {
    pub wages: f64,
    pub raise_rate: f64,
    pub secondary_income: f64,
    pub secondary_income_end_age: Option<u32>,
    pub passive_income: f64,
    pub passive_income_growth: f64,
    /// Annual growth applied to configured account contributions while working.
    pub contribution_growth: f64,
}

impl Default for IncomeSettings {
    fn default() -> Self {
        Self {
            wages: 0.0,
            raise_rate: 0.03,
            secondary_income: 0.0,
            secondary_income_end_age: None,
            passive_income: 0.0,
            passive_income_growth: 0.0,
            contribution_growth: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployerMatch {
    /// Fraction of each matched dollar the employer adds, e.g. 0.5.
    pub rate: f64,
    /// Share of wages eligible for matching, e.g. 0.06.
    pub wage_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub annual_contribution: f64,
    /// Overrides the blended allocation return when set.
    #[serde(default)]
    pub expected_return: Option<f64>,
    #[serde(default)]
    pub employer_match: Option<EmployerMatch>,
}

impl Account {
    pub fn new(id: impl Into<String>, kind: AccountKind, balance: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            balance,
            annual_contribution: 0.0,
            expected_return: None,
            employer_match: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseSettings {
    pub living: f64,
    pub housing: f64,
    /// Mortgage-style housing cost ends at this age.
    pub housing_end_age: Option<u32>,
    pub healthcare: f64,
    /// Extra premium paid in retired years before Medicare at 65.
    pub retiree_healthcare_bridge: f64,
    pub per_dependent: f64,
    pub general_inflation: f64,
    pub medical_inflation: f64,
}

impl Default for ExpenseSettings {
    fn default() -> Self {
        Self {
            living: 0.0,
            housing: 0.0,
            housing_end_age: None,
            healthcare: 0.0,
            retiree_healthcare_bridge: 0.0,
            per_dependent: 0.0,
            general_inflation: 0.025,
            medical_inflation: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SocialSecuritySettings {
    /// Annual benefit at full retirement age, in today's money.
    pub benefit_at_full_retirement_age: f64,
    pub full_retirement_age: u32,
    pub claim_age: u32,
}

impl Default for SocialSecuritySettings {
    fn default() -> Self {
        Self {
            benefit_at_full_retirement_age: 0.0,
            full_retirement_age: 67,
            claim_age: 67,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxSettings {
    /// Flat state rate; falls back to the state table when absent.
    pub state_rate: Option<f64>,
    /// Share of a brokerage sale treated as long-term gain.
    pub taxable_gain_fraction: f64,
    pub bracket_indexing: bool,
}

impl Default for TaxSettings {
    fn default() -> Self {
        Self {
            state_rate: None,
            taxable_gain_fraction: 0.5,
            bracket_indexing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Allocation {
    pub stocks_pct: f64,
    pub bonds_pct: f64,
    pub cash_pct: f64,
    pub stock_return: f64,
    pub bond_return: f64,
    pub cash_return: f64,
}

impl Default for Allocation {
    fn default() -> Self {
        Self {
            stocks_pct: 70.0,
            bonds_pct: 25.0,
            cash_pct: 5.0,
            stock_return: 0.07,
            bond_return: 0.04,
            cash_return: 0.02,
        }
    }
}

impl Allocation {
    const FALLBACK_RETURN: f64 = 0.05;

    /// Weighted return of the mix. Percentages need not sum to 100; the
    /// weights are normalised, and an empty mix uses a flat fallback.
    pub fn blended_return(&self) -> f64 {
        let stocks = self.stocks_pct.max(0.0);
        let bonds = self.bonds_pct.max(0.0);
        let cash = self.cash_pct.max(0.0);
        let total = stocks + bonds + cash;
        if !total.is_finite() || total <= 1e-9 {
            return Self::FALLBACK_RETURN;
        }
        (stocks * self.stock_return + bonds * self.bond_return + cash * self.cash_return) / total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sensitivity {
    pub bear_return_delta: f64,
    pub bull_return_delta: f64,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            bear_return_delta: -0.02,
            bull_return_delta: 0.02,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionPreference {
    Proportional,
    TaxDeferredFirst,
    TaxFreeFirst,
    TaxableOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoalSettings {
    pub target_net_worth: f64,
    /// Defaults to the retirement age.
    pub reference_age: Option<u32>,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub max_income_multiple: f64,
    pub preference: ContributionPreference,
}

impl Default for GoalSettings {
    fn default() -> Self {
        Self {
            target_net_worth: 0.0,
            reference_age: None,
            tolerance: 1_000.0,
            max_iterations: 50,
            max_income_multiple: 1.0,
            preference: ContributionPreference::Proportional,
        }
    }
}

/// Complete household configuration handed to the engine as a read-only snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub personal: Personal,
    #[serde(default)]
    pub income: IncomeSettings,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub expenses: ExpenseSettings,
    #[serde(default)]
    pub social_security: SocialSecuritySettings,
    #[serde(default)]
    pub tax: TaxSettings,
    #[serde(default)]
    pub allocation: Allocation,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub moves: Vec<Move>,
    #[serde(default)]
    pub goal: GoalSettings,
    /// Keep positive cash flow in cash instead of treating it as spent.
    #[serde(default)]
    pub save_surplus: bool,
}

fn current_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

impl Plan {
    pub fn new(current_age: u32, retirement_age: u32) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            personal: Personal {
                current_age,
                retirement_age,
                terminal_age: DEFAULT_TERMINAL_AGE,
                filing_status: FilingStatus::Single,
                state: String::new(),
                dependents: 0,
                dependents_until_age: None,
            },
            income: IncomeSettings::default(),
            accounts: Vec::new(),
            expenses: ExpenseSettings::default(),
            social_security: SocialSecuritySettings::default(),
            tax: TaxSettings::default(),
            allocation: Allocation::default(),
            sensitivity: Sensitivity::default(),
            moves: Vec::new(),
            goal: GoalSettings::default(),
            save_surplus: false,
        }
    }

    pub fn horizon_years(&self) -> usize {
        (self.personal.terminal_age.saturating_sub(self.personal.current_age) + 1) as usize
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn find_move(&self, id: &str) -> Option<&Move> {
        self.moves.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeBreakdown {
    pub wages: f64,
    pub secondary: f64,
    pub social_security: f64,
    pub passive: f64,
    /// Required minimum and 72(t) distributions.
    pub distributions: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal: f64,
    pub state: f64,
    pub payroll: f64,
    pub capital_gains: f64,
    pub early_withdrawal_penalty: f64,
    pub taxable_social_security: f64,
    pub marginal_ordinary_rate: f64,
    pub marginal_capital_gains_rate: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseBreakdown {
    pub living: f64,
    pub housing: f64,
    pub healthcare: f64,
    pub dependents: f64,
    /// Tuition left after 529 balances.
    pub education: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEffects {
    pub roth_conversion: f64,
    pub roth_401k_transfer: f64,
    pub withdrawal: f64,
    pub foreign_pension_proceeds: f64,
    pub education_withdrawal: f64,
    pub charitable_distribution: f64,
    pub windfall: f64,
    pub mortgage_payoff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub id: String,
    pub kind: AccountKind,
    pub balance: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResult {
    pub net_worth: f64,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub age: u32,
    pub phase: Phase,
    pub income: IncomeBreakdown,
    pub taxes: TaxBreakdown,
    pub expenses: ExpenseBreakdown,
    pub contributions: f64,
    pub employer_match: f64,
    /// income - taxes - expenses
    pub net_cash_flow: f64,
    pub unmet_shortfall: f64,
    pub surplus_saved: f64,
    pub effects: MoveEffects,
    pub balances: Vec<AccountBalance>,
    pub unallocated_cash: f64,
    pub net_worth: f64,
    pub status: Status,
    pub bear: TrackResult,
    pub bull: TrackResult,
    pub active_moves: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorthCheckpoint {
    pub age: u32,
    pub net_worth: f64,
    pub bear_net_worth: f64,
    pub bull_net_worth: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCashFlow {
    pub years: u32,
    pub income: f64,
    pub taxes: f64,
    pub expenses: f64,
    pub contributions: f64,
    pub net_cash_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub first_failure_age: Option<u32>,
    pub bear_first_failure_age: Option<u32>,
    pub bull_first_failure_age: Option<u32>,
    pub checkpoints: Vec<NetWorthCheckpoint>,
    pub net_worth_at_retirement: f64,
    /// At `goal.referenceAge`, or the retirement age when no goal age is set.
    pub net_worth_at_reference_age: f64,
    pub terminal_net_worth: f64,
    pub peak_net_worth: f64,
    pub peak_net_worth_age: u32,
    pub total_taxes: f64,
    pub total_income: f64,
    pub total_expenses: f64,
    pub total_social_security: f64,
    pub total_withdrawals: f64,
    pub total_unmet_shortfall: f64,
    pub effective_tax_rate: f64,
    pub working: PhaseCashFlow,
    pub retirement: PhaseCashFlow,
    pub retirement_balances: Vec<AccountBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub years: Vec<YearResult>,
    pub summary: SimulationSummary,
}

impl SimulationResult {
    pub fn year(&self, age: u32) -> Option<&YearResult> {
        self.years.iter().find(|y| y.age == age)
    }

    pub fn net_worth_at(&self, age: u32) -> Option<f64> {
        self.year(age).map(|y| y.net_worth)
    }
}
