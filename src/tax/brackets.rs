//! Progressive rate schedules and preferential-rate stacking
//!
//! Regular income tax feeds the foreign tax credit limitation and the AMT
//! comparison; the same capital-gain stacking is reused by the AMT
//! carve-out.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{Bracket, FilingStatus, TaxYearConfig};
use crate::error::EngineResult;
use crate::money::floor_zero;

/// The three preferential rates and the two taxable-income thresholds that
/// separate them for one filing status
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreferentialRates {
    pub zero_rate: Decimal,
    pub middle_rate: Decimal,
    pub top_rate: Decimal,
    pub zero_rate_top: Decimal,
    pub middle_rate_top: Decimal,
}

impl PreferentialRates {
    pub fn from_config(config: &TaxYearConfig, status: FilingStatus) -> EngineResult<Self> {
        let cg = &config.income.capital_gains;
        Ok(Self {
            zero_rate: config.require(cg.zero_rate, "income.capital_gains.zero_rate")?,
            middle_rate: config.require(cg.middle_rate, "income.capital_gains.middle_rate")?,
            top_rate: config.require(cg.top_rate, "income.capital_gains.top_rate")?,
            zero_rate_top: config.for_status(&cg.zero_rate_top, status, "income.capital_gains.zero_rate_top")?,
            middle_rate_top: config.for_status(
                &cg.middle_rate_top,
                status,
                "income.capital_gains.middle_rate_top",
            )?,
        })
    }
}

/// Regular tax split into its ordinary and preferential parts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegularTax {
    pub ordinary_income: Decimal,
    pub preferential_income: Decimal,
    pub ordinary_tax: Decimal,
    pub preferential_tax: Decimal,
    pub total: Decimal,
}

/// Tax on `income` under a progressive schedule
pub fn schedule_tax(brackets: &[Bracket], income: Decimal) -> Decimal {
    let income = floor_zero(income);
    let mut tax = Decimal::ZERO;
    let mut lower = Decimal::ZERO;

    for bracket in brackets {
        if income <= lower {
            break;
        }
        let upper = bracket.up_to.map_or(income, |top| top.min(income));
        if upper > lower {
            tax += (upper - lower) * bracket.rate;
        }
        match bracket.up_to {
            Some(top) => lower = top,
            None => break,
        }
    }

    tax
}

/// Tax on `preferential` income stacked on top of `ordinary_base`.
///
/// The portion that fits under the zero-rate threshold (after the ordinary
/// base) is taxed at the zero rate, the next slice up to the middle
/// threshold at the middle rate, and the rest at the top rate.
pub fn stacked_preferential_tax(
    rates: &PreferentialRates,
    ordinary_base: Decimal,
    preferential: Decimal,
) -> Decimal {
    let base = floor_zero(ordinary_base);
    let preferential = floor_zero(preferential);

    let zero_room = floor_zero(rates.zero_rate_top - base);
    let at_zero = preferential.min(zero_room);

    let middle_room = floor_zero(rates.middle_rate_top - base.max(rates.zero_rate_top));
    let at_middle = (preferential - at_zero).min(middle_room);

    let at_top = preferential - at_zero - at_middle;

    at_zero * rates.zero_rate + at_middle * rates.middle_rate + at_top * rates.top_rate
}

/// Regular tax on `taxable_income` of which `preferential_income`
/// (qualified dividends plus net capital gain) gets preferential rates.
///
/// Returns the smaller of the stacked computation and taxing everything at
/// ordinary rates.
pub fn regular_tax(
    config: &TaxYearConfig,
    status: FilingStatus,
    taxable_income: Decimal,
    preferential_income: Decimal,
) -> EngineResult<RegularTax> {
    let brackets = config.for_status(&config.income.ordinary_brackets, status, "income.ordinary_brackets")?;
    let rates = PreferentialRates::from_config(config, status)?;

    let taxable_income = floor_zero(taxable_income);
    let preferential_income = floor_zero(preferential_income).min(taxable_income);
    let ordinary_income = taxable_income - preferential_income;

    let ordinary_tax = schedule_tax(&brackets, ordinary_income);
    let preferential_tax = stacked_preferential_tax(&rates, ordinary_income, preferential_income);
    let all_ordinary = schedule_tax(&brackets, taxable_income);

    let (ordinary_tax, preferential_tax) = if ordinary_tax + preferential_tax <= all_ordinary {
        (ordinary_tax, preferential_tax)
    } else {
        (all_ordinary, Decimal::ZERO)
    };

    let ordinary_tax = config.round(ordinary_tax);
    let preferential_tax = config.round(preferential_tax);

    Ok(RegularTax {
        ordinary_income,
        preferential_income,
        ordinary_tax,
        preferential_tax,
        total: ordinary_tax + preferential_tax,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn single_2025() -> TaxYearConfig {
        TaxYearConfig::builtin(2025).unwrap()
    }

    #[test]
    fn test_schedule_tax_walks_brackets() {
        let brackets = vec![
            Bracket { up_to: Some(dec!(10000)), rate: dec!(0.10) },
            Bracket { up_to: Some(dec!(40000)), rate: dec!(0.20) },
            Bracket { up_to: None, rate: dec!(0.30) },
        ];
        assert_eq!(schedule_tax(&brackets, dec!(0)), dec!(0));
        assert_eq!(schedule_tax(&brackets, dec!(5000)), dec!(500));
        assert_eq!(schedule_tax(&brackets, dec!(40000)), dec!(7000));
        assert_eq!(schedule_tax(&brackets, dec!(50000)), dec!(10000));
        assert_eq!(schedule_tax(&brackets, dec!(-100)), dec!(0));
    }

    #[test]
    fn test_regular_tax_ordinary_only() {
        let config = single_2025();
        let tax = regular_tax(&config, FilingStatus::Single, dec!(100000), dec!(0)).unwrap();
        // 1192.50 + 4386.00 + 11335.50
        assert_eq!(tax.total, dec!(16914.00));
        assert_eq!(tax.preferential_tax, dec!(0));
    }

    #[test]
    fn test_preferential_income_straddles_zero_bracket() {
        let config = single_2025();
        let tax = regular_tax(&config, FilingStatus::Single, dec!(60000), dec!(20000)).unwrap();
        // Ordinary 40000: 1192.50 + 28075 * 0.12 = 4561.50
        // Preferential: 8350 at 0%, 11650 at 15% = 1747.50
        assert_eq!(tax.ordinary_tax, dec!(4561.50));
        assert_eq!(tax.preferential_tax, dec!(1747.50));
        assert_eq!(tax.total, dec!(6309.00));
    }

    #[test]
    fn test_stacked_preferential_reaches_top_rate() {
        let rates = PreferentialRates {
            zero_rate: dec!(0),
            middle_rate: dec!(0.15),
            top_rate: dec!(0.20),
            zero_rate_top: dec!(50000),
            middle_rate_top: dec!(500000),
        };
        // Base already above zero-rate band
        assert_eq!(stacked_preferential_tax(&rates, dec!(490000), dec!(30000)), dec!(5500));
        assert_eq!(stacked_preferential_tax(&rates, dec!(0), dec!(40000)), dec!(0));
    }

    #[test]
    fn test_preferential_capped_at_taxable_income() {
        let config = single_2025();
        let tax = regular_tax(&config, FilingStatus::Single, dec!(10000), dec!(50000)).unwrap();
        assert_eq!(tax.preferential_income, dec!(10000));
        assert_eq!(tax.total, dec!(0));
    }
}
