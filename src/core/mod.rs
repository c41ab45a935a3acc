mod engine;
mod error;
mod schedule;
mod types;
mod validate;

pub use engine::{
    prorated_contribution_balance, project, resolve_monthly_contribution, run_scenario, summarize,
    withdrawal_tax,
};
pub use error::ValidationError;
pub use schedule::{
    DEFAULT_HORIZON_YEARS, WithdrawalSchedule, active_contribution_horizon, compile_withdrawals,
    simulation_horizon,
};
pub use types::{
    COUPLE_ALLOWANCE, ContributionOverride, ExtraContribution, Household, OverrideResolution,
    Phase, Projection, ProjectionSummary, ProjectionWarning, SINGLE_ALLOWANCE, Scenario,
    SimulationParameters, TaxRegime, WithdrawalGoal, YearRecord,
};
pub use validate::{MAX_HORIZON_YEARS, detect_override_overlaps, validate_scenario};
