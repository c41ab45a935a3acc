use super::types::WithdrawalGoal;

/// Horizon used when a scenario has neither goals nor an explicit horizon.
pub const DEFAULT_HORIZON_YEARS: u32 = 60;

/// Per-year withdrawal amounts plus the two horizons derived from the goals.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalSchedule {
    /// Index `y - 1` holds the amount requested in year `y`.
    pub amounts: Vec<f64>,
    pub horizon: u32,
    pub active_horizon: u32,
}

impl WithdrawalSchedule {
    /// Without goals, `fallback_horizon` bounds the run and contributions
    /// stay active for all of it.
    pub fn compile(goals: &[WithdrawalGoal], fallback_horizon: u32) -> Self {
        let horizon = simulation_horizon(goals, fallback_horizon);
        Self {
            amounts: compile_withdrawals(goals, horizon),
            horizon,
            active_horizon: active_contribution_horizon(goals, fallback_horizon),
        }
    }
}

/// Withdrawals start the year after `target_year` and are truncated at the
/// horizon. Goals landing on the same year are summed.
pub fn compile_withdrawals(goals: &[WithdrawalGoal], horizon: u32) -> Vec<f64> {
    let mut amounts = vec![0.0; horizon as usize];
    for goal in goals {
        let first = goal.target_year.saturating_add(1);
        let last = goal.last_withdrawal_year().min(horizon);
        for year in first..=last {
            amounts[(year - 1) as usize] += goal.annual_amount;
        }
    }
    amounts
}

pub fn active_contribution_horizon(goals: &[WithdrawalGoal], default: u32) -> u32 {
    goals
        .iter()
        .map(|goal| goal.target_year)
        .max()
        .unwrap_or(default)
}

pub fn simulation_horizon(goals: &[WithdrawalGoal], explicit: u32) -> u32 {
    goals
        .iter()
        .map(WithdrawalGoal::last_withdrawal_year)
        .max()
        .unwrap_or(explicit)
}
