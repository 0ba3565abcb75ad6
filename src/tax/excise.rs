//! Additional taxes on qualified plans (Form 5329)
//!
//! Three independent pieces summed at the end: the early-distribution
//! additional tax, the excess-contribution excise per account type, and the
//! RMD shortfall excise.

use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TaxYearConfig;
use crate::error::EngineResult;
use crate::money::floor_zero;

/// Statutory exceptions to the early-distribution additional tax
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionCode {
    AgeFiftyNineAndAHalf,
    Disability,
    Death,
    /// Substantially equal periodic payments, §72(t)
    PeriodicPayments,
    HigherEducation,
    MedicalExpenses,
    FirstHome,
    BirthOrAdoption,
    ReservistCallUp,
    TerminalIllness,
    SeparationFromService,
    Qdro,
    IrsLevy,
    HealthInsuranceUnemployed,
    DomesticAbuse,
    EmergencyExpense,
    QualifiedDisaster,
}

impl ExceptionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionCode::AgeFiftyNineAndAHalf => "age 59½",
            ExceptionCode::Disability => "disability",
            ExceptionCode::Death => "death",
            ExceptionCode::PeriodicPayments => "periodic payments",
            ExceptionCode::HigherEducation => "higher education",
            ExceptionCode::MedicalExpenses => "medical expenses",
            ExceptionCode::FirstHome => "first home",
            ExceptionCode::BirthOrAdoption => "birth or adoption",
            ExceptionCode::ReservistCallUp => "reservist call-up",
            ExceptionCode::TerminalIllness => "terminal illness",
            ExceptionCode::SeparationFromService => "separation from service",
            ExceptionCode::Qdro => "QDRO",
            ExceptionCode::IrsLevy => "IRS levy",
            ExceptionCode::HealthInsuranceUnemployed => "health insurance while unemployed",
            ExceptionCode::DomesticAbuse => "domestic abuse",
            ExceptionCode::EmergencyExpense => "emergency expense",
            ExceptionCode::QualifiedDisaster => "qualified disaster",
        }
    }
}

/// An exception claimed on a distribution; `amount` matters only for the
/// partial exceptions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExceptionClaim {
    pub code: ExceptionCode,
    #[serde(default)]
    pub amount: Decimal,
}

impl ExceptionClaim {
    pub fn full(code: ExceptionCode) -> Self {
        Self {
            code,
            amount: Decimal::ZERO,
        }
    }
}

/// A distribution taken before the penalty-free age
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarlyDistribution {
    pub description: String,
    pub gross_amount: Decimal,
    /// Amount subject to the additional tax before exceptions: the part
    /// includible in income plus any Roth conversion recapture
    pub taxable_amount: Decimal,
    #[serde(default)]
    pub exception: Option<ExceptionClaim>,
    /// SIMPLE IRA distribution within two years of first participation
    #[serde(default)]
    pub simple_ira_first_two_years: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    TraditionalIra,
    RothIra,
    Coverdell,
    Hsa,
    Able,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::TraditionalIra => "Traditional IRA",
            AccountType::RothIra => "Roth IRA",
            AccountType::Coverdell => "Coverdell ESA",
            AccountType::Hsa => "HSA",
            AccountType::Able => "ABLE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcessContribution {
    pub account_type: AccountType,
    #[serde(default)]
    pub current_year_excess: Decimal,
    #[serde(default)]
    pub prior_year_excess: Decimal,
    /// Contribution room left unused this year, absorbing prior excess
    #[serde(default)]
    pub unused_contribution_room: Decimal,
    #[serde(default)]
    pub withdrawn_timely: Decimal,
    #[serde(default)]
    pub recharacterized: Decimal,
    #[serde(default)]
    pub year_end_value: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RmdShortfall {
    pub description: String,
    pub required: Decimal,
    pub actual: Decimal,
    #[serde(default)]
    pub corrected_timely: bool,
    #[serde(default)]
    pub waiver_requested: bool,
}

/// Taxpayer facts some exceptions depend on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExciseContext {
    pub taxpayer_age: Decimal,
    pub adjusted_gross_income: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarlyDistributionResult {
    pub description: String,
    pub taxable_amount: Decimal,
    pub exception: Option<ExceptionCode>,
    pub exception_amount: Decimal,
    pub penalty_base: Decimal,
    pub rate: Decimal,
    pub penalty: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcessContributionResult {
    pub account_type: AccountType,
    pub taxable_excess: Decimal,
    pub tax: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RmdResult {
    pub description: String,
    pub shortfall: Decimal,
    pub rate: Decimal,
    pub penalty: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExciseBreakdown {
    pub early_distributions: Vec<EarlyDistributionResult>,
    pub early_distribution_tax: Decimal,
    pub excess_contributions: Vec<ExcessContributionResult>,
    pub excess_contribution_tax: Decimal,
    pub rmd_shortfalls: Vec<RmdResult>,
    pub rmd_tax: Decimal,
    pub total: Decimal,
}

/// Portion of `dist` covered by an exception, never above the taxable amount.
///
/// Reaching the penalty-free age covers the whole distribution whether or
/// not an exception was claimed.
pub fn exception_amount(
    dist: &EarlyDistribution,
    context: &ExciseContext,
    config: &TaxYearConfig,
) -> EngineResult<Decimal> {
    let taxable = floor_zero(dist.taxable_amount);
    let penalty_free_age = config.require(config.ira.penalty_free_age, "ira.penalty_free_age")?;
    if context.taxpayer_age >= penalty_free_age {
        return Ok(taxable);
    }
    let Some(claim) = dist.exception else {
        return Ok(Decimal::ZERO);
    };
    let excise = &config.excise;

    let covered = match claim.code {
        // Age was checked above
        ExceptionCode::AgeFiftyNineAndAHalf => Decimal::ZERO,
        ExceptionCode::SeparationFromService => {
            let age = config.require(excise.separation_from_service_age, "excise.separation_from_service_age")?;
            if context.taxpayer_age >= age {
                taxable
            } else {
                Decimal::ZERO
            }
        }
        ExceptionCode::Disability
        | ExceptionCode::Death
        | ExceptionCode::PeriodicPayments
        | ExceptionCode::ReservistCallUp
        | ExceptionCode::TerminalIllness
        | ExceptionCode::Qdro
        | ExceptionCode::IrsLevy => taxable,
        ExceptionCode::HigherEducation | ExceptionCode::HealthInsuranceUnemployed => claim.amount,
        ExceptionCode::MedicalExpenses => {
            let floor_rate = config.require(excise.medical_agi_floor_rate, "excise.medical_agi_floor_rate")?;
            floor_zero(claim.amount - context.adjusted_gross_income * floor_rate)
        }
        ExceptionCode::FirstHome => {
            let cap = config.require(config.ira.first_home_lifetime_cap, "ira.first_home_lifetime_cap")?;
            claim.amount.min(cap)
        }
        ExceptionCode::BirthOrAdoption => {
            claim.amount.min(config.require(excise.birth_or_adoption_cap, "excise.birth_or_adoption_cap")?)
        }
        ExceptionCode::EmergencyExpense => {
            claim.amount.min(config.require(excise.emergency_expense_cap, "excise.emergency_expense_cap")?)
        }
        ExceptionCode::DomesticAbuse => {
            claim.amount.min(config.require(excise.domestic_abuse_cap, "excise.domestic_abuse_cap")?)
        }
        ExceptionCode::QualifiedDisaster => {
            claim.amount.min(config.require(excise.disaster_cap, "excise.disaster_cap")?)
        }
    };

    Ok(floor_zero(covered).min(taxable))
}

pub fn calculate(
    early_distributions: &[EarlyDistribution],
    excess_contributions: &[ExcessContribution],
    rmd_shortfalls: &[RmdShortfall],
    context: &ExciseContext,
    config: &TaxYearConfig,
) -> EngineResult<ExciseBreakdown> {
    let excise = &config.excise;
    let early_rate = config.require(excise.early_distribution_rate, "excise.early_distribution_rate")?;
    let simple_rate = config.require(excise.simple_ira_early_rate, "excise.simple_ira_early_rate")?;
    let excess_rate = config.require(excise.excess_contribution_rate, "excise.excess_contribution_rate")?;
    let rmd_rate = config.require(excise.rmd_shortfall_rate, "excise.rmd_shortfall_rate")?;
    let rmd_corrected_rate = config.require(excise.rmd_corrected_rate, "excise.rmd_corrected_rate")?;

    let mut breakdown = ExciseBreakdown::default();

    for dist in early_distributions {
        let taxable_amount = floor_zero(dist.taxable_amount);
        let exception_amount = exception_amount(dist, context, config)?;
        let penalty_base = floor_zero(taxable_amount - exception_amount);
        let rate = if dist.simple_ira_first_two_years {
            simple_rate
        } else {
            early_rate
        };
        let penalty = config.round(penalty_base * rate);
        breakdown.early_distribution_tax += penalty;
        breakdown.early_distributions.push(EarlyDistributionResult {
            description: dist.description.clone(),
            taxable_amount: config.round(taxable_amount),
            exception: dist.exception.map(|c| c.code),
            exception_amount: config.round(exception_amount),
            penalty_base: config.round(penalty_base),
            rate,
            penalty,
        });
    }

    // Account types are never netted against each other
    let by_account = excess_contributions
        .iter()
        .sorted_by_key(|e| e.account_type)
        .chunk_by(|e| e.account_type);
    for (account_type, group) in &by_account {
        let records: Vec<&ExcessContribution> = group.collect();
        let current: Decimal = records.iter().map(|r| r.current_year_excess).sum();
        let prior: Decimal = records.iter().map(|r| r.prior_year_excess).sum();
        let room: Decimal = records.iter().map(|r| r.unused_contribution_room).sum();
        let withdrawn: Decimal = records.iter().map(|r| r.withdrawn_timely).sum();
        let recharacterized: Decimal = records.iter().map(|r| r.recharacterized).sum();

        let taxable_excess = floor_zero(current + floor_zero(prior - room) - withdrawn - recharacterized);
        let mut tax = taxable_excess * excess_rate;
        let values: Vec<Decimal> = records.iter().filter_map(|r| r.year_end_value).collect();
        if !values.is_empty() {
            let value: Decimal = values.iter().copied().sum();
            tax = tax.min(floor_zero(value) * excess_rate);
        }
        let tax = config.round(tax);

        debug!("Excess contribution {}: base {} tax {}", account_type.as_str(), taxable_excess, tax);
        breakdown.excess_contribution_tax += tax;
        breakdown.excess_contributions.push(ExcessContributionResult {
            account_type,
            taxable_excess: config.round(taxable_excess),
            tax,
        });
    }

    for rmd in rmd_shortfalls {
        let shortfall = floor_zero(rmd.required - rmd.actual);
        let rate = if rmd.waiver_requested {
            Decimal::ZERO
        } else if rmd.corrected_timely {
            rmd_corrected_rate
        } else {
            rmd_rate
        };
        let penalty = config.round(shortfall * rate);
        breakdown.rmd_tax += penalty;
        breakdown.rmd_shortfalls.push(RmdResult {
            description: rmd.description.clone(),
            shortfall: config.round(shortfall),
            rate,
            penalty,
        });
    }

    breakdown.total = breakdown.early_distribution_tax + breakdown.excess_contribution_tax + breakdown.rmd_tax;
    Ok(breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> TaxYearConfig {
        TaxYearConfig::builtin(2025).unwrap()
    }

    fn context(age: Decimal) -> ExciseContext {
        ExciseContext {
            taxpayer_age: age,
            adjusted_gross_income: dec!(80000),
        }
    }

    fn early(taxable: Decimal, exception: Option<ExceptionClaim>) -> EarlyDistribution {
        EarlyDistribution {
            description: "IRA".to_string(),
            gross_amount: taxable,
            taxable_amount: taxable,
            exception,
            simple_ira_first_two_years: false,
        }
    }

    #[test]
    fn test_early_distribution_per_record_floor() {
        let dists = vec![
            early(dec!(10000), None),
            early(
                dec!(2000),
                Some(ExceptionClaim {
                    code: ExceptionCode::HigherEducation,
                    amount: dec!(5000),
                }),
            ),
        ];

        let result = calculate(&dists, &[], &[], &context(dec!(40)), &config()).unwrap();

        assert_eq!(result.early_distributions[1].exception_amount, dec!(2000));
        assert_eq!(result.early_distributions[1].penalty, dec!(0));
        assert_eq!(result.early_distribution_tax, dec!(1000));
    }

    #[test]
    fn test_capped_exceptions() {
        let birth = early(
            dec!(8000),
            Some(ExceptionClaim {
                code: ExceptionCode::BirthOrAdoption,
                amount: dec!(8000),
            }),
        );
        let emergency = early(
            dec!(3000),
            Some(ExceptionClaim {
                code: ExceptionCode::EmergencyExpense,
                amount: dec!(3000),
            }),
        );

        let result = calculate(&[birth, emergency], &[], &[], &context(dec!(35)), &config()).unwrap();

        // 3000 over the 5000 birth cap, 2000 over the 1000 emergency cap
        assert_eq!(result.early_distributions[0].penalty_base, dec!(3000));
        assert_eq!(result.early_distributions[1].penalty_base, dec!(2000));
        assert_eq!(result.early_distribution_tax, dec!(500));
    }

    #[test]
    fn test_medical_exception_only_above_agi_floor() {
        let dist = early(
            dec!(10000),
            Some(ExceptionClaim {
                code: ExceptionCode::MedicalExpenses,
                amount: dec!(9000),
            }),
        );
        // Floor 80000 * 7.5% = 6000, covered 3000
        let covered = exception_amount(&dist, &context(dec!(45)), &config()).unwrap();
        assert_eq!(covered, dec!(3000));
    }

    #[test]
    fn test_penalty_free_age_waives_unclaimed_distribution() {
        let result = calculate(&[early(dec!(10000), None)], &[], &[], &context(dec!(66)), &config()).unwrap();

        assert_eq!(result.early_distribution_tax, dec!(0));
        assert_eq!(result.early_distributions[0].exception_amount, dec!(10000));
        assert_eq!(result.early_distributions[0].exception, None);

        let younger = calculate(&[early(dec!(10000), None)], &[], &[], &context(dec!(59)), &config()).unwrap();
        assert_eq!(younger.early_distribution_tax, dec!(1000.00));
    }

    #[test]
    fn test_separation_from_service_needs_age_55() {
        let dist = early(dec!(10000), Some(ExceptionClaim::full(ExceptionCode::SeparationFromService)));
        assert_eq!(exception_amount(&dist, &context(dec!(56)), &config()).unwrap(), dec!(10000));
        assert_eq!(exception_amount(&dist, &context(dec!(52)), &config()).unwrap(), dec!(0));
    }

    #[test]
    fn test_simple_ira_first_two_years_rate() {
        let mut dist = early(dec!(4000), None);
        dist.simple_ira_first_two_years = true;
        let result = calculate(&[dist], &[], &[], &context(dec!(30)), &config()).unwrap();
        assert_eq!(result.early_distribution_tax, dec!(1000));
    }

    #[test]
    fn test_excess_contributions_tracked_per_account() {
        let records = vec![
            ExcessContribution {
                account_type: AccountType::RothIra,
                current_year_excess: dec!(2000),
                prior_year_excess: dec!(1000),
                unused_contribution_room: dec!(0),
                withdrawn_timely: dec!(500),
                recharacterized: dec!(0),
                year_end_value: None,
            },
            ExcessContribution {
                account_type: AccountType::Hsa,
                current_year_excess: dec!(0),
                prior_year_excess: dec!(0),
                unused_contribution_room: dec!(0),
                withdrawn_timely: dec!(700),
                recharacterized: dec!(0),
                year_end_value: None,
            },
            ExcessContribution {
                account_type: AccountType::TraditionalIra,
                current_year_excess: dec!(0),
                prior_year_excess: dec!(3000),
                unused_contribution_room: dec!(1000),
                withdrawn_timely: dec!(0),
                recharacterized: dec!(0),
                year_end_value: Some(dec!(10000)),
            },
        ];

        let result = calculate(&[], &records, &[], &context(dec!(40)), &config()).unwrap();

        // Traditional 2000 * 6%, Roth 2500 * 6%, HSA withdrawal does not offset Roth
        assert_eq!(result.excess_contributions.len(), 3);
        assert_eq!(result.excess_contributions[0].tax, dec!(120));
        assert_eq!(result.excess_contributions[1].tax, dec!(150));
        assert_eq!(result.excess_contributions[2].tax, dec!(0));
        assert_eq!(result.excess_contribution_tax, dec!(270));
    }

    #[test]
    fn test_excess_tax_capped_by_account_value() {
        let record = ExcessContribution {
            account_type: AccountType::RothIra,
            current_year_excess: dec!(7000),
            prior_year_excess: dec!(0),
            unused_contribution_room: dec!(0),
            withdrawn_timely: dec!(0),
            recharacterized: dec!(0),
            year_end_value: Some(dec!(2500)),
        };
        let result = calculate(&[], &[record], &[], &context(dec!(40)), &config()).unwrap();
        assert_eq!(result.excess_contribution_tax, dec!(150));
    }

    #[test]
    fn test_rmd_shortfall_rates() {
        let rmd = |corrected, waiver| RmdShortfall {
            description: "IRA RMD".to_string(),
            required: dec!(12000),
            actual: dec!(2000),
            corrected_timely: corrected,
            waiver_requested: waiver,
        };

        let result = calculate(
            &[],
            &[],
            &[rmd(false, false), rmd(true, false), rmd(false, true)],
            &context(dec!(75)),
            &config(),
        )
        .unwrap();

        assert_eq!(result.rmd_shortfalls[0].penalty, dec!(2500));
        assert_eq!(result.rmd_shortfalls[1].penalty, dec!(1000));
        assert_eq!(result.rmd_shortfalls[2].penalty, dec!(0));
        assert_eq!(result.total, dec!(3500));
    }
}
