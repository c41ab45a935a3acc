use super::error::ValidationError;
use super::schedule::{DEFAULT_HORIZON_YEARS, simulation_horizon};
use super::types::{ContributionOverride, ProjectionWarning, Scenario};

pub const MAX_HORIZON_YEARS: u32 = 300;

pub fn validate_scenario(scenario: &Scenario) -> Result<(), ValidationError> {
    let params = &scenario.params;

    non_negative("initial_capital", params.initial_capital)?;
    fee_rate("entry_fee_rate_initial", params.entry_fee_rate_initial)?;
    non_negative("monthly_contribution", params.monthly_contribution)?;
    fee_rate(
        "entry_fee_rate_contribution",
        params.entry_fee_rate_contribution,
    )?;
    non_negative(
        "annual_return_accumulation",
        params.annual_return_accumulation,
    )?;
    non_negative(
        "annual_return_decumulation",
        params.annual_return_decumulation,
    )?;
    fee_rate("management_fee_rate", params.management_fee_rate)?;
    non_negative("allowance_amount", params.allowance_amount)?;

    for (idx, ov) in scenario.overrides.iter().enumerate() {
        let field = format!("overrides[{idx}]");
        first_year(&format!("{field}.start_year"), ov.start_year)?;
        if ov.end_year < ov.start_year {
            return Err(ValidationError::InvertedInterval {
                field,
                start_year: ov.start_year,
                end_year: ov.end_year,
            });
        }
        non_negative(&format!("{field}.monthly_amount"), ov.monthly_amount)?;
    }

    for (idx, extra) in scenario.extras.iter().enumerate() {
        first_year(&format!("extras[{idx}].year"), extra.year)?;
        non_negative(&format!("extras[{idx}].amount"), extra.amount)?;
    }

    for (idx, goal) in scenario.goals.iter().enumerate() {
        if goal.name.trim().is_empty() {
            return Err(ValidationError::EmptyName {
                field: format!("goals[{idx}].name"),
            });
        }
        first_year(&format!("goals[{idx}].target_year"), goal.target_year)?;
        non_negative(&format!("goals[{idx}].annual_amount"), goal.annual_amount)?;
        first_year(
            &format!("goals[{idx}].duration_years"),
            goal.duration_years,
        )?;
    }

    let horizon = simulation_horizon(
        &scenario.goals,
        scenario.horizon_years.unwrap_or(DEFAULT_HORIZON_YEARS),
    );
    if horizon == 0 || horizon > MAX_HORIZON_YEARS {
        return Err(ValidationError::HorizonOutOfRange {
            value: horizon,
            max: MAX_HORIZON_YEARS,
        });
    }

    Ok(())
}

/// Reports every pair of overrides sharing at least one year, in input order.
pub fn detect_override_overlaps(overrides: &[ContributionOverride]) -> Vec<ProjectionWarning> {
    let mut warnings = Vec::new();
    for (i, first) in overrides.iter().enumerate() {
        for (j, second) in overrides.iter().enumerate().skip(i + 1) {
            let from_year = first.start_year.max(second.start_year);
            let to_year = first.end_year.min(second.end_year);
            if from_year <= to_year {
                tracing::debug!(
                    first = i,
                    second = j,
                    from_year,
                    to_year,
                    "contribution overrides overlap"
                );
                warnings.push(ProjectionWarning::OverlappingOverrides {
                    first: i,
                    second: j,
                    from_year,
                    to_year,
                });
            }
        }
    }
    warnings
}

fn finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NotFinite {
            field: field.to_string(),
            value,
        })
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn fee_rate(field: &str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if !(0.0..1.0).contains(&value) {
        return Err(ValidationError::RateOutOfRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn first_year(field: &str, value: u32) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::YearBeforeStart {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}
