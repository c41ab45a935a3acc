use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

use crate::core::{
    ContributionOverride, ExtraContribution, Household, OverrideResolution, Projection, Scenario,
    SimulationParameters, TaxRegime, WithdrawalGoal, run_scenario, validate_scenario,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTaxRegime {
    #[value(name = "under-8-years")]
    Under8Years,
    #[value(name = "over-8-years")]
    Over8Years,
}

impl From<CliTaxRegime> for TaxRegime {
    fn from(value: CliTaxRegime) -> Self {
        match value {
            CliTaxRegime::Under8Years => TaxRegime::Under8Years,
            CliTaxRegime::Over8Years => TaxRegime::Over8Years,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliHousehold {
    Single,
    Couple,
}

impl From<CliHousehold> for Household {
    fn from(value: CliHousehold) -> Self {
        match value {
            CliHousehold::Single => Household::Single,
            CliHousehold::Couple => Household::Couple,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliOverrideResolution {
    FirstMatch,
    LastMatch,
}

impl From<CliOverrideResolution> for OverrideResolution {
    fn from(value: CliOverrideResolution) -> Self {
        match value {
            CliOverrideResolution::FirstMatch => OverrideResolution::FirstMatch,
            CliOverrideResolution::LastMatch => OverrideResolution::LastMatch,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiTaxRegime {
    #[serde(
        rename = "under-8-years",
        alias = "under8-years",
        alias = "under8Years",
        alias = "under_8_years",
        alias = "under-8y"
    )]
    Under8Years,
    #[serde(
        rename = "over-8-years",
        alias = "over8-years",
        alias = "over8Years",
        alias = "over_8_years",
        alias = "over-8y"
    )]
    Over8Years,
}

impl From<ApiTaxRegime> for CliTaxRegime {
    fn from(value: ApiTaxRegime) -> Self {
        match value {
            ApiTaxRegime::Under8Years => CliTaxRegime::Under8Years,
            ApiTaxRegime::Over8Years => CliTaxRegime::Over8Years,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiHousehold {
    #[serde(alias = "solo")]
    Single,
    Couple,
}

impl From<ApiHousehold> for CliHousehold {
    fn from(value: ApiHousehold) -> Self {
        match value {
            ApiHousehold::Single => CliHousehold::Single,
            ApiHousehold::Couple => CliHousehold::Couple,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiOverrideResolution {
    #[serde(alias = "firstMatch", alias = "first_match", alias = "first")]
    FirstMatch,
    #[serde(alias = "lastMatch", alias = "last_match", alias = "last")]
    LastMatch,
}

impl From<ApiOverrideResolution> for CliOverrideResolution {
    fn from(value: ApiOverrideResolution) -> Self {
        match value {
            ApiOverrideResolution::FirstMatch => CliOverrideResolution::FirstMatch,
            ApiOverrideResolution::LastMatch => CliOverrideResolution::LastMatch,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverridePayload {
    start_year: u32,
    end_year: u32,
    monthly_amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtraPayload {
    year: u32,
    amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalPayload {
    name: Option<String>,
    target_year: u32,
    annual_amount: f64,
    duration_years: u32,
}

/// Web and scenario-file input. Percent fields use the same units as the
/// matching CLI flags; anything left out keeps the flag value.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    initial_capital: Option<f64>,
    entry_fee_initial: Option<f64>,
    monthly_contribution: Option<f64>,
    entry_fee_contribution: Option<f64>,
    annual_return: Option<f64>,
    decumulation_return: Option<f64>,
    management_fee: Option<f64>,
    contract_age: Option<ApiTaxRegime>,
    household: Option<ApiHousehold>,
    allowance: Option<f64>,
    override_resolution: Option<ApiOverrideResolution>,
    horizon_years: Option<u32>,

    overrides: Option<Vec<OverridePayload>>,
    extras: Option<Vec<ExtraPayload>>,
    goals: Option<Vec<GoalPayload>>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Year-by-year savings projection with goal withdrawals and gain taxation"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (trace, debug, info, warn, error); RUST_LOG overrides it"
    )]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the projection API over HTTP
    Serve {
        #[arg(default_value_t = 8080)]
        port: u16,
    },
    /// Run one projection and print the ledger
    Project(ProjectArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProjectArgs {
    #[arg(long, default_value_t = 2000.0, help = "Initial lump sum")]
    initial_capital: f64,
    #[arg(
        long,
        default_value_t = 4.5,
        help = "Entry fee on the initial lump sum in percent"
    )]
    entry_fee_initial: f64,
    #[arg(long, default_value_t = 400.0, help = "Baseline monthly contribution")]
    monthly_contribution: f64,
    #[arg(
        long,
        default_value_t = 4.5,
        help = "Entry fee on every contribution in percent"
    )]
    entry_fee_contribution: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Annual return in percent until the last goal year"
    )]
    annual_return: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual return in percent once withdrawals are under way"
    )]
    decumulation_return: f64,
    #[arg(long, default_value_t = 0.8, help = "Annual management fee in percent")]
    management_fee: f64,
    #[arg(long, value_enum, default_value_t = CliTaxRegime::Under8Years)]
    contract_age: CliTaxRegime,
    #[arg(
        long,
        value_enum,
        default_value_t = CliHousehold::Single,
        help = "Household status; a couple shares a doubled gain allowance"
    )]
    household: CliHousehold,
    #[arg(long, help = "Explicit gain allowance, overriding --household")]
    allowance: Option<f64>,
    #[arg(long, value_enum, default_value_t = CliOverrideResolution::FirstMatch)]
    override_resolution: CliOverrideResolution,
    #[arg(long, help = "Years to project when no goal is given (default 60)")]
    horizon: Option<u32>,
    #[arg(
        long = "goal",
        value_name = "NAME:YEAR:AMOUNT:DURATION",
        value_parser = parse_goal_arg,
        help = "Withdraw AMOUNT a year for DURATION years after YEAR; repeatable"
    )]
    goals: Vec<WithdrawalGoal>,
    #[arg(
        long = "change",
        value_name = "START-END:AMOUNT",
        value_parser = parse_change_arg,
        help = "Replace the monthly contribution for a year range (0 pauses); repeatable"
    )]
    changes: Vec<ContributionOverride>,
    #[arg(
        long = "extra",
        value_name = "YEAR:AMOUNT",
        value_parser = parse_extra_arg,
        help = "One-off contribution at the end of YEAR; repeatable"
    )]
    extras: Vec<ExtraContribution>,
    #[arg(
        long,
        help = "JSON scenario file; its values take precedence over flags"
    )]
    scenario: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse<'a> {
    parameters: &'a SimulationParameters,
    goals: &'a [WithdrawalGoal],
    #[serde(flatten)]
    projection: &'a Projection,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_goal_arg(raw: &str) -> Result<WithdrawalGoal, String> {
    // Split from the right so goal names may contain ':'.
    let parts: Vec<&str> = raw.rsplitn(4, ':').collect();
    let [duration, amount, year, name] = parts.as_slice() else {
        return Err(format!(
            "invalid goal '{raw}', expected NAME:YEAR:AMOUNT:DURATION"
        ));
    };
    Ok(WithdrawalGoal {
        name: name.trim().to_string(),
        target_year: parse_number(year, "goal year")?,
        annual_amount: parse_number(amount, "goal amount")?,
        duration_years: parse_number(duration, "goal duration")?,
    })
}

fn parse_change_arg(raw: &str) -> Result<ContributionOverride, String> {
    let Some((range, amount)) = raw.split_once(':') else {
        return Err(format!(
            "invalid contribution change '{raw}', expected START-END:AMOUNT"
        ));
    };
    let (start, end) = range.split_once('-').unwrap_or((range, range));
    Ok(ContributionOverride {
        start_year: parse_number(start, "change start year")?,
        end_year: parse_number(end, "change end year")?,
        monthly_amount: parse_number(amount, "change amount")?,
    })
}

fn parse_extra_arg(raw: &str) -> Result<ExtraContribution, String> {
    let Some((year, amount)) = raw.split_once(':') else {
        return Err(format!("invalid extra '{raw}', expected YEAR:AMOUNT"));
    };
    Ok(ExtraContribution {
        year: parse_number(year, "extra year")?,
        amount: parse_number(amount, "extra amount")?,
    })
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("invalid {what} '{}'", raw.trim()))
}

fn build_scenario(args: ProjectArgs) -> Result<Scenario, String> {
    for (name, rate) in [
        ("--entry-fee-initial", args.entry_fee_initial),
        ("--entry-fee-contribution", args.entry_fee_contribution),
        ("--management-fee", args.management_fee),
    ] {
        if !(0.0..100.0).contains(&rate) {
            return Err(format!("{name} must be >= 0 and < 100"));
        }
    }

    for (name, rate) in [
        ("--annual-return", args.annual_return),
        ("--decumulation-return", args.decumulation_return),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if !args.initial_capital.is_finite() || args.initial_capital < 0.0 {
        return Err("--initial-capital must be >= 0".to_string());
    }

    if !args.monthly_contribution.is_finite() || args.monthly_contribution < 0.0 {
        return Err("--monthly-contribution must be >= 0".to_string());
    }

    if let Some(allowance) = args.allowance {
        if !allowance.is_finite() || allowance < 0.0 {
            return Err("--allowance must be >= 0".to_string());
        }
    }

    let household: Household = args.household.into();
    let scenario = Scenario {
        params: SimulationParameters {
            initial_capital: args.initial_capital,
            entry_fee_rate_initial: args.entry_fee_initial / 100.0,
            monthly_contribution: args.monthly_contribution,
            entry_fee_rate_contribution: args.entry_fee_contribution / 100.0,
            annual_return_accumulation: args.annual_return / 100.0,
            annual_return_decumulation: args.decumulation_return / 100.0,
            management_fee_rate: args.management_fee / 100.0,
            tax_regime: args.contract_age.into(),
            allowance_amount: args.allowance.unwrap_or_else(|| household.allowance()),
            override_resolution: args.override_resolution.into(),
        },
        overrides: args.changes,
        extras: args.extras,
        goals: args.goals,
        horizon_years: args.horizon,
    };

    validate_scenario(&scenario).map_err(|e| e.to_string())?;
    Ok(scenario)
}

/// Runs the `project` subcommand and returns the rendered output.
pub fn run_project_command(mut args: ProjectArgs) -> Result<String, String> {
    let format = args.format;
    if let Some(path) = args.scenario.take() {
        let payload = load_scenario_file(&path)?;
        args = apply_payload(args, payload);
        tracing::info!(path = %path.display(), "loaded scenario file");
    }

    let scenario = build_scenario(args)?;
    let projection = run_scenario(&scenario).map_err(|e| e.to_string())?;
    match format {
        OutputFormat::Json => {
            let response = build_project_response(&scenario, &projection);
            serde_json::to_string_pretty(&response)
                .map_err(|e| format!("failed to serialise projection: {e}"))
        }
        OutputFormat::Table => Ok(render_table(&projection)),
    }
}

fn load_scenario_file(path: &Path) -> Result<ProjectPayload, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read scenario file {}: {e}", path.display()))?;
    serde_json::from_str::<ProjectPayload>(&raw)
        .map_err(|e| format!("invalid scenario file {}: {e}", path.display()))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("projection API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// Query strings carry scalar fields only; scenarios with overrides, extras
/// or goals must be sent through POST.
async fn project_get_handler(Query(payload): Query<ProjectPayload>) -> Response {
    project_handler_impl(payload).await
}

async fn project_post_handler(Json(payload): Json<ProjectPayload>) -> Response {
    project_handler_impl(payload).await
}

async fn project_handler_impl(payload: ProjectPayload) -> Response {
    let scenario = match scenario_from_payload(payload) {
        Ok(scenario) => scenario,
        Err(msg) => {
            tracing::debug!(error = %msg, "rejected projection request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match run_scenario(&scenario) {
        Ok(projection) => json_response(
            StatusCode::OK,
            build_project_response(&scenario, &projection),
        ),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn scenario_from_json(json: &str) -> Result<Scenario, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    scenario_from_payload(payload)
}

fn scenario_from_payload(payload: ProjectPayload) -> Result<Scenario, String> {
    build_scenario(apply_payload(default_project_args(), payload))
}

fn apply_payload(mut args: ProjectArgs, payload: ProjectPayload) -> ProjectArgs {
    if let Some(v) = payload.initial_capital {
        args.initial_capital = v;
    }
    if let Some(v) = payload.entry_fee_initial {
        args.entry_fee_initial = v;
    }
    if let Some(v) = payload.monthly_contribution {
        args.monthly_contribution = v;
    }
    if let Some(v) = payload.entry_fee_contribution {
        args.entry_fee_contribution = v;
    }
    if let Some(v) = payload.annual_return {
        args.annual_return = v;
    }
    if let Some(v) = payload.decumulation_return {
        args.decumulation_return = v;
    }
    if let Some(v) = payload.management_fee {
        args.management_fee = v;
    }
    if let Some(v) = payload.contract_age {
        args.contract_age = v.into();
    }
    if let Some(v) = payload.household {
        args.household = v.into();
    }
    if let Some(v) = payload.allowance {
        args.allowance = Some(v);
    }
    if let Some(v) = payload.override_resolution {
        args.override_resolution = v.into();
    }
    if let Some(v) = payload.horizon_years {
        args.horizon = Some(v);
    }

    if let Some(overrides) = payload.overrides {
        args.changes = overrides
            .into_iter()
            .map(|ov| ContributionOverride {
                start_year: ov.start_year,
                end_year: ov.end_year,
                monthly_amount: ov.monthly_amount,
            })
            .collect();
    }
    if let Some(extras) = payload.extras {
        args.extras = extras
            .into_iter()
            .map(|extra| ExtraContribution {
                year: extra.year,
                amount: extra.amount,
            })
            .collect();
    }
    if let Some(goals) = payload.goals {
        args.goals = goals
            .into_iter()
            .enumerate()
            .map(|(idx, goal)| WithdrawalGoal {
                name: goal.name.unwrap_or_else(|| format!("Goal {}", idx + 1)),
                target_year: goal.target_year,
                annual_amount: goal.annual_amount,
                duration_years: goal.duration_years,
            })
            .collect();
    }

    args
}

fn default_project_args() -> ProjectArgs {
    ProjectArgs {
        initial_capital: 2_000.0,
        entry_fee_initial: 4.5,
        monthly_contribution: 400.0,
        entry_fee_contribution: 4.5,
        annual_return: 5.0,
        decumulation_return: 3.0,
        management_fee: 0.8,
        contract_age: CliTaxRegime::Under8Years,
        household: CliHousehold::Single,
        allowance: None,
        override_resolution: CliOverrideResolution::FirstMatch,
        horizon: None,
        goals: Vec::new(),
        changes: Vec::new(),
        extras: Vec::new(),
        scenario: None,
        format: OutputFormat::Json,
    }
}

fn build_project_response<'a>(
    scenario: &'a Scenario,
    projection: &'a Projection,
) -> ProjectResponse<'a> {
    ProjectResponse {
        parameters: &scenario.params,
        goals: &scenario.goals,
        projection,
    }
}

/// Plain fixed-width ledger for terminals; amounts have two decimals and no
/// currency symbol.
pub fn render_table(projection: &Projection) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4} {:>14} {:>12} {:>10} {:>12} {:>10} {:>12} {:>10} {:>12} {:>14} {:>14} {:>7}",
        "Year",
        "Start",
        "Contrib",
        "Extra",
        "Return",
        "Fees",
        "Withdrawal",
        "Tax",
        "Net",
        "End",
        "Principal",
        "Gain%"
    );
    for row in &projection.years {
        let clip_marker = if row.withdrawal_clipped { "*" } else { "" };
        let _ = writeln!(
            out,
            "{:>4} {:>14.2} {:>12.2} {:>10.2} {:>12.2} {:>10.2} {:>12} {:>10.2} {:>12.2} {:>14.2} {:>14.2} {:>6.2}%",
            row.year,
            row.capital_start_of_year,
            row.contributions_net_this_year,
            row.extra_contribution_net_this_year,
            row.return_this_year,
            row.management_fee_this_year,
            format!("{:.2}{clip_marker}", row.withdrawal_gross_this_year),
            row.tax_this_year,
            row.withdrawal_net_this_year,
            row.capital_end_of_year,
            row.invested_principal_cumulative,
            row.gain_fraction_of_capital * 100.0
        );
    }

    let summary = &projection.summary;
    let _ = writeln!(
        out,
        "\nFinal capital {:.2} | principal {:.2} | withdrawn {:.2} net of {:.2} tax | fees {:.2}",
        summary.final_capital,
        summary.final_invested_principal,
        summary.total_withdrawn_net,
        summary.total_tax,
        summary.total_management_fees
    );
    if summary.clipped_years > 0 {
        let _ = writeln!(
            out,
            "* withdrawal capped at available capital in {} year(s)",
            summary.clipped_years
        );
    }
    out
}
