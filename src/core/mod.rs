mod edit;
mod engine;
mod error;
mod ledger;
mod migrate;
mod moves;
mod solver;
mod states;
mod summary;
mod tax;
mod types;
mod withdrawal;

pub use edit::{ExpenseLine, PlanEdit};
pub use engine::{MAX_TERMINAL_AGE, claim_adjustment, simulate, validate_plan};
pub use error::PlanError;
pub use migrate::{CURRENT_SCHEMA_VERSION, load_plan, migrate_plan, schema_version};
pub use moves::{
    ConflictPair, Move, MoveCategory, MoveKind, MoveSpec, MoveUnit, catalog, detect_conflicts,
    find_spec, find_spec_by_id, set_move_enabled, toggle_move,
};
pub use solver::{
    ContributionShare, GoalInfeasible, GoalOutcome, GoalSolution, GoalSolveConfig,
    GoalSolveIteration, InfeasibleReason, apply_solution, solve_goal,
};
pub use states::state_rate;
pub use tax::{
    Bracket, TaxAssessment, TaxInput, assess, capital_gains_brackets, ordinary_brackets,
    payroll_tax, progressive_tax, round_money, standard_deduction, taxable_social_security,
};
pub use types::{
    Account, AccountBalance, AccountKind, Allocation, ContributionPreference, EmployerMatch,
    ExpenseBreakdown, ExpenseSettings, FilingStatus, GoalSettings, IncomeBreakdown,
    IncomeSettings, MoveEffects, NetWorthCheckpoint, Personal, Phase, PhaseCashFlow, Plan,
    Sensitivity, SimulationResult, SimulationSummary, SocialSecuritySettings, Status,
    TaxBreakdown, TaxSettings, TrackResult, YearResult,
};
pub use withdrawal::WithdrawalOrder;
