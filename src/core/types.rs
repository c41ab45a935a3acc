use serde::Serialize;

/// Gain exemption ceiling for a single holder under the over-8-year regime.
pub const SINGLE_ALLOWANCE: f64 = 4_600.0;
/// Shared ceiling for a couple filing jointly.
pub const COUPLE_ALLOWANCE: f64 = 9_200.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxRegime {
    #[serde(rename = "under-8-years")]
    Under8Years,
    #[serde(rename = "over-8-years")]
    Over8Years,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Household {
    Single,
    Couple,
}

impl Household {
    pub fn allowance(self) -> f64 {
        match self {
            Household::Single => SINGLE_ALLOWANCE,
            Household::Couple => COUPLE_ALLOWANCE,
        }
    }
}

/// Tie-break used when several contribution overrides cover the same year.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideResolution {
    #[default]
    FirstMatch,
    LastMatch,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulation,
    Decumulation,
}

/// Engine inputs. Every rate is a fraction, so 0.05 means 5%.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub initial_capital: f64,
    pub entry_fee_rate_initial: f64,
    pub monthly_contribution: f64,
    pub entry_fee_rate_contribution: f64,
    pub annual_return_accumulation: f64,
    pub annual_return_decumulation: f64,
    pub management_fee_rate: f64,
    pub tax_regime: TaxRegime,
    pub allowance_amount: f64,
    pub override_resolution: OverrideResolution,
}

/// Replaces the baseline monthly contribution for every year in
/// `start_year..=end_year`. An amount of zero pauses contributions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionOverride {
    pub start_year: u32,
    pub end_year: u32,
    pub monthly_amount: f64,
}

impl ContributionOverride {
    pub fn covers(&self, year: u32) -> bool {
        self.start_year <= year && year <= self.end_year
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraContribution {
    pub year: u32,
    pub amount: f64,
}

/// Withdraws `annual_amount` in each year after `target_year`, for
/// `duration_years` years.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalGoal {
    pub name: String,
    pub target_year: u32,
    pub annual_amount: f64,
    pub duration_years: u32,
}

impl WithdrawalGoal {
    pub fn last_withdrawal_year(&self) -> u32 {
        self.target_year.saturating_add(self.duration_years)
    }
}

/// A complete, caller-built request for one projection run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub params: SimulationParameters,
    pub overrides: Vec<ContributionOverride>,
    pub extras: Vec<ExtraContribution>,
    pub goals: Vec<WithdrawalGoal>,
    /// Horizon used when `goals` is empty. Goals always decide otherwise.
    pub horizon_years: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: u32,
    pub phase: Phase,
    pub capital_start_of_year: f64,
    pub capital_after_withdrawal: f64,
    pub contributions_active: bool,
    pub contributions_net_this_year: f64,
    pub extra_contribution_net_this_year: f64,
    pub return_this_year: f64,
    pub management_fee_this_year: f64,
    pub capital_end_of_year: f64,
    pub withdrawal_requested_this_year: f64,
    pub withdrawal_gross_this_year: f64,
    pub withdrawal_clipped: bool,
    pub principal_portion: f64,
    pub gain_portion: f64,
    pub tax_this_year: f64,
    pub withdrawal_net_this_year: f64,
    pub invested_principal_cumulative: f64,
    pub gain_fraction_of_capital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProjectionWarning {
    #[serde(rename_all = "camelCase")]
    OverlappingOverrides {
        first: usize,
        second: usize,
        from_year: u32,
        to_year: u32,
    },
    #[serde(rename_all = "camelCase")]
    ClippedWithdrawal {
        year: u32,
        requested: f64,
        available: f64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub years: u32,
    pub final_capital: f64,
    pub final_invested_principal: f64,
    pub total_contributions_net: f64,
    pub total_extra_contributions_net: f64,
    pub total_return: f64,
    pub total_management_fees: f64,
    pub total_withdrawn_gross: f64,
    pub total_withdrawn_net: f64,
    pub total_tax: f64,
    pub clipped_years: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub years: Vec<YearRecord>,
    pub warnings: Vec<ProjectionWarning>,
    pub summary: ProjectionSummary,
}
