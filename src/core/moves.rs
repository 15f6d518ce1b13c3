use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveCategory {
    Contribution,
    Conversion,
    WithdrawalOrder,
    LifeEvent,
}

impl MoveCategory {
    /// Order in which a year's active moves are applied.
    pub const PRECEDENCE: [MoveCategory; 4] = [
        MoveCategory::Contribution,
        MoveCategory::Conversion,
        MoveCategory::WithdrawalOrder,
        MoveCategory::LifeEvent,
    ];
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveUnit {
    Currency,
    Percent,
    Auto,
    FullBalance,
}

/// A toggleable strategy as stored in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub id: String,
    pub category: MoveCategory,
    #[serde(default)]
    pub enabled: bool,
    pub unit: MoveUnit,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub start_age: u32,
    #[serde(default)]
    pub end_age: Option<u32>,
    /// One-directional declaration; conflicts are symmetric when evaluated.
    #[serde(default)]
    pub conflicts_with: Vec<String>,
}

impl Move {
    pub fn kind(&self) -> Option<MoveKind> {
        MoveKind::from_id(&self.id)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn in_window(&self, age: u32) -> bool {
        age >= self.start_age && self.end_age.is_none_or(|end| age <= end)
    }

    pub fn is_active_at(&self, age: u32) -> bool {
        self.enabled && self.in_window(age)
    }

    fn declares_conflict_with(&self, other: &str) -> bool {
        if self.id == other {
            return false;
        }
        if self.conflicts_with.iter().any(|c| c == other) {
            return true;
        }
        self.kind()
            .and_then(find_spec)
            .is_some_and(|spec| spec.conflicts.iter().any(|k| k.id() == other))
    }

    fn conflicts_with_move(&self, other: &Move) -> bool {
        self.declares_conflict_with(&other.id) || other.declares_conflict_with(&self.id)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum MoveKind {
    Max401k,
    Roth401kContributions,
    TraditionalIra,
    RothIra,
    BackdoorRoth,
    MegaBackdoorRoth,
    HsaMax,
    BrokerageInvesting,
    SavingsRateIncrease,
    EmployerMatchCapture,
    CatchUpContributions,
    Education529,
    RothConversion,
    RothConversionBracketFill,
    Roth401kRollover,
    ForeignPensionLiquidation,
    TaxLossHarvesting,
    ConservativeGlidePath,
    AggressiveAllocation,
    DeferredBeforeTaxable,
    RothBeforeDeferred,
    ProportionalWithdrawals,
    RuleOf55,
    Sepp72t,
    RequiredMinimumDistributions,
    QualifiedCharitableDistribution,
    GuardrailSpendingCut,
    SellHome,
    DownsizeHome,
    PayOffMortgage,
    RelocateNoIncomeTaxState,
    PartTimeWork,
    Sabbatical,
    DelaySocialSecurity,
    ClaimSocialSecurityEarly,
    LongTermCareInsurance,
    Inheritance,
    CollegeTuition,
}

impl MoveKind {
    pub fn id(self) -> &'static str {
        match self {
            MoveKind::Max401k => "max-401k",
            MoveKind::Roth401kContributions => "roth-401k-contributions",
            MoveKind::TraditionalIra => "traditional-ira",
            MoveKind::RothIra => "roth-ira",
            MoveKind::BackdoorRoth => "backdoor-roth",
            MoveKind::MegaBackdoorRoth => "mega-backdoor-roth",
            MoveKind::HsaMax => "hsa-max",
            MoveKind::BrokerageInvesting => "brokerage-investing",
            MoveKind::SavingsRateIncrease => "savings-rate-increase",
            MoveKind::EmployerMatchCapture => "employer-match-capture",
            MoveKind::CatchUpContributions => "catch-up-contributions",
            MoveKind::Education529 => "education-529",
            MoveKind::RothConversion => "roth-conversion",
            MoveKind::RothConversionBracketFill => "roth-conversion-bracket-fill",
            MoveKind::Roth401kRollover => "roth-401k-rollover",
            MoveKind::ForeignPensionLiquidation => "foreign-pension-liquidation",
            MoveKind::TaxLossHarvesting => "tax-loss-harvesting",
            MoveKind::ConservativeGlidePath => "conservative-glide-path",
            MoveKind::AggressiveAllocation => "aggressive-allocation",
            MoveKind::DeferredBeforeTaxable => "deferred-before-taxable",
            MoveKind::RothBeforeDeferred => "roth-before-deferred",
            MoveKind::ProportionalWithdrawals => "proportional-withdrawals",
            MoveKind::RuleOf55 => "rule-of-55",
            MoveKind::Sepp72t => "sepp-72t",
            MoveKind::RequiredMinimumDistributions => "required-minimum-distributions",
            MoveKind::QualifiedCharitableDistribution => "qualified-charitable-distribution",
            MoveKind::GuardrailSpendingCut => "guardrail-spending-cut",
            MoveKind::SellHome => "sell-home",
            MoveKind::DownsizeHome => "downsize-home",
            MoveKind::PayOffMortgage => "pay-off-mortgage",
            MoveKind::RelocateNoIncomeTaxState => "relocate-no-income-tax-state",
            MoveKind::PartTimeWork => "part-time-work",
            MoveKind::Sabbatical => "sabbatical",
            MoveKind::DelaySocialSecurity => "delay-social-security",
            MoveKind::ClaimSocialSecurityEarly => "claim-social-security-early",
            MoveKind::LongTermCareInsurance => "long-term-care-insurance",
            MoveKind::Inheritance => "inheritance",
            MoveKind::CollegeTuition => "college-tuition",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        CATALOG.iter().map(|s| s.kind).find(|k| k.id() == id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MoveSpec {
    pub kind: MoveKind,
    pub category: MoveCategory,
    pub unit: MoveUnit,
    pub default_amount: f64,
    pub label: &'static str,
    pub conflicts: &'static [MoveKind],
}

impl MoveSpec {
    pub fn instantiate(&self, start_age: u32, end_age: Option<u32>) -> Move {
        Move {
            id: self.kind.id().to_string(),
            category: self.category,
            enabled: false,
            unit: self.unit,
            amount: self.default_amount,
            start_age,
            end_age,
            conflicts_with: self.conflicts.iter().map(|k| k.id().to_string()).collect(),
        }
    }
}

const fn spec(
    kind: MoveKind,
    category: MoveCategory,
    unit: MoveUnit,
    default_amount: f64,
    label: &'static str,
    conflicts: &'static [MoveKind],
) -> MoveSpec {
    MoveSpec {
        kind,
        category,
        unit,
        default_amount,
        label,
        conflicts,
    }
}

use MoveCategory::{Contribution, Conversion, LifeEvent, WithdrawalOrder};
use MoveUnit::{Auto, Currency, FullBalance, Percent};

static CATALOG: [MoveSpec; 38] = [
    spec(
        MoveKind::Max401k,
        Contribution,
        Auto,
        0.0,
        "Max out 401(k)",
        &[MoveKind::CatchUpContributions],
    ),
    spec(
        MoveKind::Roth401kContributions,
        Contribution,
        Percent,
        1.0,
        "Route 401(k) deferrals to Roth",
        &[],
    ),
    spec(
        MoveKind::TraditionalIra,
        Contribution,
        Currency,
        7_000.0,
        "Traditional IRA",
        &[MoveKind::RothIra],
    ),
    spec(MoveKind::RothIra, Contribution, Currency, 7_000.0, "Roth IRA", &[]),
    spec(
        MoveKind::BackdoorRoth,
        Contribution,
        Currency,
        7_000.0,
        "Backdoor Roth IRA",
        &[MoveKind::RothIra, MoveKind::TraditionalIra],
    ),
    spec(MoveKind::MegaBackdoorRoth, Contribution, Currency, 20_000.0, "Mega backdoor Roth", &[]),
    spec(MoveKind::HsaMax, Contribution, Auto, 0.0, "Max out HSA", &[]),
    spec(
        MoveKind::BrokerageInvesting,
        Contribution,
        Currency,
        10_000.0,
        "Invest in brokerage",
        &[],
    ),
    spec(MoveKind::SavingsRateIncrease, Contribution, Percent, 0.05, "Raise savings rate", &[]),
    spec(
        MoveKind::EmployerMatchCapture,
        Contribution,
        Auto,
        0.0,
        "Capture full employer match",
        &[],
    ),
    spec(MoveKind::CatchUpContributions, Contribution, Auto, 0.0, "Catch-up contributions", &[]),
    spec(MoveKind::Education529, Contribution, Currency, 5_000.0, "Fund 529 plan", &[]),
    spec(
        MoveKind::RothConversion,
        Conversion,
        Currency,
        45_000.0,
        "Roth conversion",
        &[MoveKind::RothConversionBracketFill],
    ),
    spec(
        MoveKind::RothConversionBracketFill,
        Conversion,
        Percent,
        0.22,
        "Fill bracket with Roth conversions",
        &[],
    ),
    spec(
        MoveKind::Roth401kRollover,
        Conversion,
        FullBalance,
        0.0,
        "Roll Roth 401(k) into Roth IRA",
        &[],
    ),
    spec(
        MoveKind::ForeignPensionLiquidation,
        Conversion,
        FullBalance,
        0.0,
        "Liquidate foreign pension",
        &[],
    ),
    spec(MoveKind::TaxLossHarvesting, Conversion, Auto, 0.0, "Tax-loss harvesting", &[]),
    spec(
        MoveKind::ConservativeGlidePath,
        Conversion,
        Percent,
        0.01,
        "Conservative glide path",
        &[MoveKind::AggressiveAllocation],
    ),
    spec(MoveKind::AggressiveAllocation, Conversion, Percent, 0.01, "Aggressive allocation", &[]),
    spec(
        MoveKind::DeferredBeforeTaxable,
        WithdrawalOrder,
        Auto,
        0.0,
        "Draw tax-deferred before brokerage",
        &[MoveKind::RothBeforeDeferred, MoveKind::ProportionalWithdrawals],
    ),
    spec(
        MoveKind::RothBeforeDeferred,
        WithdrawalOrder,
        Auto,
        0.0,
        "Draw Roth before tax-deferred",
        &[MoveKind::ProportionalWithdrawals],
    ),
    spec(
        MoveKind::ProportionalWithdrawals,
        WithdrawalOrder,
        Auto,
        0.0,
        "Proportional withdrawals",
        &[],
    ),
    spec(MoveKind::RuleOf55, WithdrawalOrder, Auto, 0.0, "Rule of 55", &[MoveKind::Sepp72t]),
    spec(MoveKind::Sepp72t, WithdrawalOrder, Currency, 20_000.0, "72(t) equal payments", &[]),
    spec(
        MoveKind::RequiredMinimumDistributions,
        WithdrawalOrder,
        Auto,
        0.0,
        "Required minimum distributions",
        &[],
    ),
    spec(
        MoveKind::QualifiedCharitableDistribution,
        WithdrawalOrder,
        Currency,
        10_000.0,
        "Qualified charitable distributions",
        &[],
    ),
    spec(
        MoveKind::GuardrailSpendingCut,
        WithdrawalOrder,
        Percent,
        0.10,
        "Guardrail spending cut",
        &[],
    ),
    spec(
        MoveKind::SellHome,
        LifeEvent,
        Currency,
        400_000.0,
        "Sell home",
        &[MoveKind::DownsizeHome, MoveKind::PayOffMortgage],
    ),
    spec(MoveKind::DownsizeHome, LifeEvent, Currency, 150_000.0, "Downsize home", &[]),
    spec(MoveKind::PayOffMortgage, LifeEvent, Currency, 200_000.0, "Pay off mortgage", &[]),
    spec(
        MoveKind::RelocateNoIncomeTaxState,
        LifeEvent,
        Auto,
        0.0,
        "Move to a no-income-tax state",
        &[],
    ),
    spec(
        MoveKind::PartTimeWork,
        LifeEvent,
        Currency,
        30_000.0,
        "Part-time work",
        &[MoveKind::Sabbatical],
    ),
    spec(MoveKind::Sabbatical, LifeEvent, Auto, 0.0, "Sabbatical", &[]),
    spec(
        MoveKind::DelaySocialSecurity,
        LifeEvent,
        Auto,
        0.0,
        "Delay Social Security to 70",
        &[MoveKind::ClaimSocialSecurityEarly],
    ),
    spec(
        MoveKind::ClaimSocialSecurityEarly,
        LifeEvent,
        Auto,
        0.0,
        "Claim Social Security at 62",
        &[],
    ),
    spec(
        MoveKind::LongTermCareInsurance,
        LifeEvent,
        Currency,
        3_000.0,
        "Long-term care insurance",
        &[],
    ),
    spec(MoveKind::Inheritance, LifeEvent, Currency, 100_000.0, "Inheritance", &[]),
    spec(MoveKind::CollegeTuition, LifeEvent, Currency, 30_000.0, "College tuition", &[]),
];

pub fn catalog() -> &'static [MoveSpec] {
    &CATALOG
}

pub fn find_spec(kind: MoveKind) -> Option<&'static MoveSpec> {
    CATALOG.iter().find(|s| s.kind == kind)
}

pub fn find_spec_by_id(id: &str) -> Option<&'static MoveSpec> {
    CATALOG.iter().find(|s| s.kind.id() == id)
}

/// Unordered pair of enabled, mutually exclusive moves. `a < b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConflictPair {
    pub a: String,
    pub b: String,
}

impl ConflictPair {
    fn new(x: &str, y: &str) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a: a.to_string(),
            b: b.to_string(),
        }
    }
}

/// Every pair of enabled moves where either side declares the other as a
/// conflict, either in the move itself or in the catalog. References to moves
/// that are absent from the list are ignored.
pub fn detect_conflicts(moves: &[Move]) -> Vec<ConflictPair> {
    let enabled: Vec<&Move> = moves.iter().filter(|m| m.enabled).collect();
    let mut pairs = BTreeSet::new();
    for (i, left) in enabled.iter().enumerate() {
        for right in &enabled[i + 1..] {
            if left.id != right.id && left.conflicts_with_move(right) {
                pairs.insert(ConflictPair::new(&left.id, &right.id));
            }
        }
    }
    pairs.into_iter().collect()
}

/// Sets a move's enabled flag. Enabling a move disables every enabled move
/// it conflicts with, so at most one side of each pair stays on.
pub fn set_move_enabled(moves: &[Move], id: &str, enabled: bool) -> Vec<Move> {
    let Some(target) = moves.iter().find(|m| m.id == id).cloned() else {
        return moves.to_vec();
    };

    moves
        .iter()
        .map(|m| {
            if m.id == id {
                m.clone().with_enabled(enabled)
            } else if enabled && m.enabled && m.conflicts_with_move(&target) {
                tracing::debug!(enabled = id, disabled = %m.id, "disabling conflicting move");
                m.clone().with_enabled(false)
            } else {
                m.clone()
            }
        })
        .collect()
}

pub fn toggle_move(moves: &[Move], id: &str) -> Vec<Move> {
    match moves.iter().find(|m| m.id == id) {
        Some(m) => set_move_enabled(moves, id, !m.enabled),
        None => moves.to_vec(),
    }
}
