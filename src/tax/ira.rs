//! Traditional and Roth IRA distributions (Form 8606)
//!
//! Traditional distributions and conversions recover basis pro rata using a
//! single nontaxable percentage for the year. Roth distributions come out of
//! contributions, then conversion layers oldest first, then earnings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::carryover::{consume, CarryoverCategory, CarryoverEntry};
use super::excise::{EarlyDistribution, ExceptionClaim, ExceptionCode};
use crate::config::TaxYearConfig;
use crate::error::EngineResult;
use crate::money::{floor_zero, ratio};

/// What remains of one Roth conversion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RothConversionLayer {
    pub conversion_year: i32,
    /// Part that was included in income when converted
    pub taxable_amount: Decimal,
    #[serde(default)]
    pub nontaxable_amount: Decimal,
}

impl RothConversionLayer {
    pub fn total(&self) -> Decimal {
        self.taxable_amount + self.nontaxable_amount
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IraProfile {
    pub taxpayer_age: Decimal,
    #[serde(default)]
    pub disabled: bool,
    /// Distributions paid to a beneficiary after the owner's death
    #[serde(default)]
    pub deceased_owner: bool,

    #[serde(default)]
    pub nondeductible_contributions: Decimal,
    /// Taken from the carryover ledger when absent
    #[serde(default)]
    pub prior_year_basis: Option<Decimal>,
    #[serde(default)]
    pub year_end_value: Decimal,
    #[serde(default)]
    pub traditional_distributions: Decimal,
    #[serde(default)]
    pub roth_conversions: Decimal,
    #[serde(default)]
    pub traditional_exception: Option<ExceptionClaim>,
    #[serde(default)]
    pub simple_ira_first_two_years: bool,

    #[serde(default)]
    pub roth_contributions: Decimal,
    /// Taken from the carryover ledger when absent
    #[serde(default)]
    pub prior_roth_contribution_basis: Option<Decimal>,
    #[serde(default)]
    pub conversion_layers: Vec<RothConversionLayer>,
    #[serde(default)]
    pub first_roth_contribution_year: Option<i32>,
    #[serde(default)]
    pub roth_distributions: Decimal,
    /// Part of the Roth distribution used for a first home purchase
    #[serde(default)]
    pub first_home_amount: Decimal,
    #[serde(default)]
    pub prior_first_home_used: Decimal,
    #[serde(default)]
    pub roth_exception: Option<ExceptionClaim>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TraditionalResult {
    pub total_basis: Decimal,
    pub denominator: Decimal,
    pub nontaxable_pct: Decimal,
    pub nontaxable_distribution: Decimal,
    pub taxable_distribution: Decimal,
    pub nontaxable_conversion: Decimal,
    pub taxable_conversion: Decimal,
    pub remaining_basis: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RothResult {
    pub five_year_met: bool,
    pub qualified: bool,
    pub qualified_amount: Decimal,
    pub from_contributions: Decimal,
    pub from_conversions: Decimal,
    /// Taxable conversion amounts withdrawn inside their five-year window
    pub conversion_recapture: Decimal,
    pub from_earnings: Decimal,
    pub taxable_earnings: Decimal,
    pub remaining_contribution_basis: Decimal,
    pub conversion_layers: Vec<RothConversionLayer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IraBreakdown {
    pub traditional: TraditionalResult,
    pub roth: RothResult,
    pub taxable_distributions: Decimal,
    /// Fed to the excise module
    pub early_distributions: Vec<EarlyDistribution>,
    pub traditional_basis_entries: Vec<CarryoverEntry>,
    pub roth_basis_entries: Vec<CarryoverEntry>,
}

/// Seed a basis category: explicit prior basis replaces the ledger entries
fn basis_entries(
    explicit: Option<Decimal>,
    ledger: &[CarryoverEntry],
    category: CarryoverCategory,
    contributions: Decimal,
    tax_year: i32,
) -> Vec<CarryoverEntry> {
    let mut entries: Vec<CarryoverEntry> = match explicit {
        Some(basis) if basis > Decimal::ZERO => {
            vec![CarryoverEntry::new(tax_year - 1, category, basis, None)]
        }
        Some(_) => Vec::new(),
        None => ledger
            .iter()
            .filter(|e| e.category == category && e.remaining_amount > Decimal::ZERO)
            .cloned()
            .collect(),
    };
    if contributions > Decimal::ZERO {
        entries.push(CarryoverEntry::new(tax_year, category, contributions, None));
    }
    entries
}

fn automatic_exception(profile: &IraProfile, claimed: Option<ExceptionClaim>) -> Option<ExceptionClaim> {
    if profile.disabled {
        Some(ExceptionClaim::full(ExceptionCode::Disability))
    } else if profile.deceased_owner {
        Some(ExceptionClaim::full(ExceptionCode::Death))
    } else {
        claimed
    }
}

/// Pro-rata basis recovery for the year
pub fn traditional_pro_rata(
    total_basis: Decimal,
    year_end_value: Decimal,
    distributions: Decimal,
    conversions: Decimal,
    config: &TaxYearConfig,
) -> TraditionalResult {
    let denominator = year_end_value + distributions + conversions;
    let pct = ratio(total_basis, denominator);

    let nontaxable_distribution = config.round(distributions * pct);
    let nontaxable_conversion = config.round(conversions * pct);

    TraditionalResult {
        total_basis: config.round(total_basis),
        denominator: config.round(denominator),
        nontaxable_pct: pct.round_dp(6),
        nontaxable_distribution,
        taxable_distribution: config.round(distributions) - nontaxable_distribution,
        nontaxable_conversion,
        taxable_conversion: config.round(conversions) - nontaxable_conversion,
        remaining_basis: config.round(floor_zero(
            total_basis - nontaxable_distribution - nontaxable_conversion,
        )),
    }
}

pub fn calculate(
    profile: &IraProfile,
    ledger: &[CarryoverEntry],
    config: &TaxYearConfig,
) -> EngineResult<IraBreakdown> {
    let tax_year = config.tax_year;
    let penalty_free_age = config.require(config.ira.penalty_free_age, "ira.penalty_free_age")?;
    let holding_years = config.require(config.ira.roth_holding_years, "ira.roth_holding_years")?;
    let first_home_cap = config.require(config.ira.first_home_lifetime_cap, "ira.first_home_lifetime_cap")?;
    let under_age = profile.taxpayer_age < penalty_free_age;

    // Traditional
    let trad_entries = basis_entries(
        profile.prior_year_basis,
        ledger,
        CarryoverCategory::TraditionalIraBasis,
        profile.nondeductible_contributions,
        tax_year,
    );
    let total_basis: Decimal = trad_entries.iter().map(|e| e.remaining_amount).sum();
    let traditional = traditional_pro_rata(
        total_basis,
        profile.year_end_value,
        profile.traditional_distributions,
        profile.roth_conversions,
        config,
    );
    let recovered = traditional.nontaxable_distribution + traditional.nontaxable_conversion;
    let traditional_basis_entries = consume(
        &trad_entries,
        CarryoverCategory::TraditionalIraBasis,
        recovered,
        tax_year,
    )
    .updated_entries;

    debug!(
        "8606 traditional: basis {} pct {} taxable {}",
        traditional.total_basis, traditional.nontaxable_pct, traditional.taxable_distribution
    );

    // Roth
    let roth_entries = basis_entries(
        profile.prior_roth_contribution_basis,
        ledger,
        CarryoverCategory::RothContributionBasis,
        profile.roth_contributions,
        tax_year,
    );
    let contribution_basis: Decimal = roth_entries.iter().map(|e| e.remaining_amount).sum();

    let mut layers = profile.conversion_layers.clone();
    if profile.roth_conversions > Decimal::ZERO {
        layers.push(RothConversionLayer {
            conversion_year: tax_year,
            taxable_amount: traditional.taxable_conversion,
            nontaxable_amount: traditional.nontaxable_conversion,
        });
    }
    layers.sort_by_key(|l| l.conversion_year);

    let distribution = floor_zero(profile.roth_distributions);
    let mut remaining = distribution;

    let from_contributions = remaining.min(contribution_basis);
    remaining -= from_contributions;

    let mut from_conversions = Decimal::ZERO;
    let mut conversion_recapture = Decimal::ZERO;
    for layer in layers.iter_mut() {
        if remaining <= Decimal::ZERO {
            break;
        }
        let taxable_part = remaining.min(layer.taxable_amount);
        layer.taxable_amount -= taxable_part;
        remaining -= taxable_part;

        let nontaxable_part = remaining.min(layer.nontaxable_amount);
        layer.nontaxable_amount -= nontaxable_part;
        remaining -= nontaxable_part;

        from_conversions += taxable_part + nontaxable_part;
        if tax_year - layer.conversion_year < holding_years {
            conversion_recapture += taxable_part;
        }
    }
    layers.retain(|l| l.total() > Decimal::ZERO);
    let from_earnings = remaining;

    let five_year_met = profile
        .first_roth_contribution_year
        .is_some_and(|first| tax_year - first >= holding_years);
    let fully_qualified =
        five_year_met && (!under_age || profile.disabled || profile.deceased_owner);
    let qualified_amount = if fully_qualified {
        distribution
    } else if five_year_met {
        let room = floor_zero(first_home_cap - profile.prior_first_home_used);
        floor_zero(profile.first_home_amount).min(room).min(distribution)
    } else {
        Decimal::ZERO
    };

    // A qualified portion shelters earnings first, then conversion recapture
    let sheltered_earnings = qualified_amount.min(from_earnings);
    let taxable_earnings = from_earnings - sheltered_earnings;
    let conversion_recapture = if under_age {
        floor_zero(conversion_recapture - (qualified_amount - sheltered_earnings))
    } else {
        Decimal::ZERO
    };

    let roth_basis_entries = consume(
        &roth_entries,
        CarryoverCategory::RothContributionBasis,
        from_contributions,
        tax_year,
    )
    .updated_entries;

    let roth = RothResult {
        five_year_met,
        qualified: fully_qualified,
        qualified_amount: config.round(qualified_amount),
        from_contributions: config.round(from_contributions),
        from_conversions: config.round(from_conversions),
        conversion_recapture: config.round(conversion_recapture),
        from_earnings: config.round(from_earnings),
        taxable_earnings: config.round(taxable_earnings),
        remaining_contribution_basis: config.round(contribution_basis - from_contributions),
        conversion_layers: layers
            .into_iter()
            .map(|l| RothConversionLayer {
                conversion_year: l.conversion_year,
                taxable_amount: config.round(l.taxable_amount),
                nontaxable_amount: config.round(l.nontaxable_amount),
            })
            .collect(),
    };

    debug!(
        "8606 Roth: contributions {} conversions {} earnings {} qualified {}",
        roth.from_contributions, roth.from_conversions, roth.from_earnings, roth.qualified
    );

    let mut early_distributions = Vec::new();
    if under_age && traditional.taxable_distribution > Decimal::ZERO {
        early_distributions.push(EarlyDistribution {
            description: "Traditional IRA distribution".to_string(),
            gross_amount: config.round(profile.traditional_distributions),
            taxable_amount: traditional.taxable_distribution,
            exception: automatic_exception(profile, profile.traditional_exception),
            simple_ira_first_two_years: profile.simple_ira_first_two_years,
        });
    }
    let roth_penalty_base = if under_age {
        roth.taxable_earnings + roth.conversion_recapture
    } else {
        Decimal::ZERO
    };
    if roth_penalty_base > Decimal::ZERO {
        early_distributions.push(EarlyDistribution {
            description: "Roth IRA distribution".to_string(),
            gross_amount: config.round(distribution),
            taxable_amount: roth_penalty_base,
            exception: automatic_exception(profile, profile.roth_exception),
            simple_ira_first_two_years: false,
        });
    }

    Ok(IraBreakdown {
        taxable_distributions: traditional.taxable_distribution
            + traditional.taxable_conversion
            + roth.taxable_earnings,
        traditional,
        roth,
        early_distributions,
        traditional_basis_entries,
        roth_basis_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> TaxYearConfig {
        TaxYearConfig::builtin(2025).unwrap()
    }

    fn profile(age: Decimal) -> IraProfile {
        IraProfile {
            taxpayer_age: age,
            ..Default::default()
        }
    }

    #[test]
    fn test_pro_rata_example() {
        let mut p = profile(dec!(62));
        p.prior_year_basis = Some(dec!(20000));
        p.year_end_value = dec!(80000);
        p.traditional_distributions = dec!(10000);

        let result = calculate(&p, &[], &config()).unwrap();
        let t = &result.traditional;

        assert_eq!(t.denominator, dec!(90000));
        assert_eq!(t.nontaxable_pct, dec!(0.222222));
        assert_eq!(t.nontaxable_distribution, dec!(2222.22));
        assert_eq!(t.taxable_distribution, dec!(7777.78));
        assert_eq!(t.remaining_basis, dec!(17777.78));
        assert!(result.early_distributions.is_empty());

        let basis_left: Decimal = result
            .traditional_basis_entries
            .iter()
            .map(|e| e.remaining_amount)
            .sum();
        assert_eq!(basis_left, dec!(17777.78));
    }

    #[test]
    fn test_nontaxable_pct_capped_at_one() {
        let t = traditional_pro_rata(dec!(50000), dec!(10000), dec!(5000), dec!(0), &config());
        assert_eq!(t.nontaxable_pct, dec!(1));
        assert_eq!(t.taxable_distribution, dec!(0));
        assert_eq!(t.remaining_basis, dec!(45000));
    }

    #[test]
    fn test_zero_denominator() {
        let t = traditional_pro_rata(dec!(3000), dec!(0), dec!(0), dec!(0), &config());
        assert_eq!(t.nontaxable_pct, dec!(0));
        assert_eq!(t.remaining_basis, dec!(3000));
    }

    #[test]
    fn test_same_ratio_for_distribution_and_conversion() {
        let mut p = profile(dec!(45));
        p.prior_year_basis = Some(dec!(6000));
        p.year_end_value = dec!(0);
        p.traditional_distributions = dec!(0);
        p.roth_conversions = dec!(60000);
        p.first_roth_contribution_year = Some(2025);

        let result = calculate(&p, &[], &config()).unwrap();

        assert_eq!(result.traditional.nontaxable_conversion, dec!(6000));
        assert_eq!(result.traditional.taxable_conversion, dec!(54000));
        assert_eq!(result.taxable_distributions, dec!(54000));
        let layer = &result.roth.conversion_layers[0];
        assert_eq!(layer.conversion_year, 2025);
        assert_eq!(layer.taxable_amount, dec!(54000));
    }

    #[test]
    fn test_basis_taken_from_ledger_when_not_supplied() {
        let mut p = profile(dec!(65));
        p.year_end_value = dec!(40000);
        p.traditional_distributions = dec!(10000);
        p.nondeductible_contributions = dec!(2000);
        let ledger = vec![CarryoverEntry::new(
            2024,
            CarryoverCategory::TraditionalIraBasis,
            dec!(8000),
            None,
        )];

        let result = calculate(&p, &ledger, &config()).unwrap();

        // Basis 10000 over 50000
        assert_eq!(result.traditional.nontaxable_distribution, dec!(2000));
        assert_eq!(result.traditional.remaining_basis, dec!(8000));
        assert_eq!(result.traditional_basis_entries[0].remaining_amount, dec!(6000));
        assert_eq!(result.traditional_basis_entries[1].remaining_amount, dec!(2000));
    }

    #[test]
    fn test_roth_ordering_contributions_conversions_earnings() {
        let mut p = profile(dec!(40));
        p.prior_roth_contribution_basis = Some(dec!(10000));
        p.first_roth_contribution_year = Some(2015);
        p.conversion_layers = vec![
            RothConversionLayer {
                conversion_year: 2023,
                taxable_amount: dec!(5000),
                nontaxable_amount: dec!(0),
            },
            RothConversionLayer {
                conversion_year: 2018,
                taxable_amount: dec!(4000),
                nontaxable_amount: dec!(1000),
            },
        ];
        p.roth_distributions = dec!(22000);

        let result = calculate(&p, &[], &config()).unwrap();
        let r = &result.roth;

        assert_eq!(r.from_contributions, dec!(10000));
        assert_eq!(r.from_conversions, dec!(10000));
        // Only the 2023 layer is inside its five-year window
        assert_eq!(r.conversion_recapture, dec!(5000));
        assert_eq!(r.from_earnings, dec!(2000));
        assert_eq!(r.taxable_earnings, dec!(2000));
        assert!(r.conversion_layers.is_empty());
        assert_eq!(r.remaining_contribution_basis, dec!(0));

        assert_eq!(result.taxable_distributions, dec!(2000));
        assert_eq!(result.early_distributions.len(), 1);
        assert_eq!(result.early_distributions[0].taxable_amount, dec!(7000));
    }

    #[test]
    fn test_qualified_distribution_is_tax_free() {
        let mut p = profile(dec!(60));
        p.prior_roth_contribution_basis = Some(dec!(5000));
        p.first_roth_contribution_year = Some(2019);
        p.roth_distributions = dec!(30000);

        let result = calculate(&p, &[], &config()).unwrap();

        assert!(result.roth.qualified);
        assert_eq!(result.roth.from_earnings, dec!(25000));
        assert_eq!(result.roth.taxable_earnings, dec!(0));
        assert!(result.early_distributions.is_empty());
    }

    #[test]
    fn test_five_year_clock_not_met() {
        let mut p = profile(dec!(70));
        p.first_roth_contribution_year = Some(2022);
        p.roth_distributions = dec!(1000);

        let result = calculate(&p, &[], &config()).unwrap();

        assert!(!result.roth.five_year_met);
        assert_eq!(result.roth.taxable_earnings, dec!(1000));
        // Over 59½: taxable but not penalized
        assert!(result.early_distributions.is_empty());
    }

    #[test]
    fn test_first_home_limited_by_lifetime_cap() {
        let mut p = profile(dec!(35));
        p.first_roth_contribution_year = Some(2018);
        p.roth_distributions = dec!(15000);
        p.first_home_amount = dec!(15000);
        p.prior_first_home_used = dec!(4000);

        let result = calculate(&p, &[], &config()).unwrap();

        assert_eq!(result.roth.qualified_amount, dec!(6000));
        assert_eq!(result.roth.taxable_earnings, dec!(9000));
        assert_eq!(result.early_distributions[0].taxable_amount, dec!(9000));
    }

    #[test]
    fn test_disability_becomes_exception() {
        let mut p = profile(dec!(50));
        p.disabled = true;
        p.year_end_value = dec!(10000);
        p.traditional_distributions = dec!(5000);

        let result = calculate(&p, &[], &config()).unwrap();

        let early = &result.early_distributions[0];
        assert_eq!(early.exception.map(|e| e.code), Some(ExceptionCode::Disability));
    }
}
