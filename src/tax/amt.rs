//! Alternative minimum tax (Form 6251)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::brackets::{stacked_preferential_tax, PreferentialRates};
use super::carryover::{consume, CarryoverCategory, CarryoverDraw, CarryoverEntry};
use crate::config::{FilingStatus, TaxYearConfig};
use crate::error::EngineResult;
use crate::money::floor_zero;

/// Named adjustments and preferences added to taxable income
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AmtAdjustmentKind {
    TaxesPaid,
    PrivateActivityBondInterest,
    QualifiedSmallBusinessStock,
    Depletion,
    InvestmentInterest,
    IncentiveStockOptions,
    Depreciation,
    PassiveActivities,
    LossLimitations,
    /// Alternative tax net operating loss deduction, usually negative
    NetOperatingLoss,
    Other,
}

impl AmtAdjustmentKind {
    /// Permanent differences; these never generate minimum tax credit
    pub fn is_exclusion_item(&self) -> bool {
        matches!(
            self,
            AmtAdjustmentKind::TaxesPaid
                | AmtAdjustmentKind::PrivateActivityBondInterest
                | AmtAdjustmentKind::QualifiedSmallBusinessStock
                | AmtAdjustmentKind::Depletion
                | AmtAdjustmentKind::InvestmentInterest
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AmtAdjustment {
    pub kind: AmtAdjustmentKind,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmtInputs {
    #[serde(default)]
    pub adjustments: Vec<AmtAdjustment>,
    #[serde(default)]
    pub exemption_override: Option<Decimal>,
    #[serde(default)]
    pub phaseout_start_override: Option<Decimal>,
    #[serde(default)]
    pub upper_rate_threshold_override: Option<Decimal>,
}

/// Regular-tax figures the AMT is measured against
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AmtContext {
    pub taxable_income: Decimal,
    /// Standard deduction claimed, added back to AMTI
    pub standard_deduction: Decimal,
    /// Qualified dividends plus net capital gain
    pub preferential_income: Decimal,
    /// Regular tax after the foreign tax credit
    pub regular_tax: Decimal,
    pub foreign_tax_credit: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AmtBreakdown {
    pub adjustments_total: Decimal,
    pub amti: Decimal,
    pub exemption_base: Decimal,
    pub phaseout_reduction: Decimal,
    pub exemption: Decimal,
    pub amt_taxable_income: Decimal,
    pub tmt_without_carve_out: Decimal,
    pub tmt_with_carve_out: Option<Decimal>,
    pub tentative_minimum_tax: Decimal,
    pub amt_foreign_tax_credit: Decimal,
    pub regular_tax: Decimal,
    pub amt_before_credit: Decimal,
    pub minimum_tax_credit_used: Decimal,
    pub amt_liability: Decimal,
    pub new_minimum_tax_credit: Decimal,
    pub draws: Vec<CarryoverDraw>,
    pub credit_entries: Vec<CarryoverEntry>,
    pub new_credit_entry: Option<CarryoverEntry>,
}

struct AmtParameters {
    exemption: Decimal,
    phaseout_start: Decimal,
    phaseout_rate: Decimal,
    lower_rate: Decimal,
    upper_rate: Decimal,
    upper_threshold: Decimal,
    rates: PreferentialRates,
}

impl AmtParameters {
    fn resolve(inputs: &AmtInputs, status: FilingStatus, config: &TaxYearConfig) -> EngineResult<Self> {
        let amt = &config.amt;
        let exemption = match inputs.exemption_override {
            Some(value) => value,
            None => config.for_status(&amt.exemption, status, "amt.exemption")?,
        };
        let phaseout_start = match inputs.phaseout_start_override {
            Some(value) => value,
            None => config.for_status(&amt.phaseout_start, status, "amt.phaseout_start")?,
        };
        let upper_threshold = match inputs.upper_rate_threshold_override {
            Some(value) => value,
            None => config.for_status(&amt.upper_rate_threshold, status, "amt.upper_rate_threshold")?,
        };

        Ok(Self {
            exemption,
            phaseout_start,
            phaseout_rate: config.require(amt.phaseout_rate, "amt.phaseout_rate")?,
            lower_rate: config.require(amt.lower_rate, "amt.lower_rate")?,
            upper_rate: config.require(amt.upper_rate, "amt.upper_rate")?,
            upper_threshold,
            rates: PreferentialRates::from_config(config, status)?,
        })
    }
}

/// Exemption after the phaseout, never negative
pub fn phased_exemption(amti: Decimal, base: Decimal, phaseout_start: Decimal, rate: Decimal) -> (Decimal, Decimal) {
    let reduction = floor_zero(amti - phaseout_start) * rate;
    (reduction, floor_zero(base - reduction))
}

/// Two-bracket tentative minimum tax on ordinary AMT income
pub fn two_rate_tax(amount: Decimal, threshold: Decimal, lower_rate: Decimal, upper_rate: Decimal) -> Decimal {
    let amount = floor_zero(amount);
    if amount <= threshold {
        amount * lower_rate
    } else {
        threshold * lower_rate + (amount - threshold) * upper_rate
    }
}

struct Tentative {
    amti: Decimal,
    reduction: Decimal,
    exemption: Decimal,
    taxable: Decimal,
    flat: Decimal,
    carve_out: Option<Decimal>,
    tmt: Decimal,
}

fn tentative_minimum_tax(amti: Decimal, preferential_income: Decimal, p: &AmtParameters) -> Tentative {
    let (reduction, exemption) = phased_exemption(amti, p.exemption, p.phaseout_start, p.phaseout_rate);
    let taxable = floor_zero(amti - exemption);
    let flat = two_rate_tax(taxable, p.upper_threshold, p.lower_rate, p.upper_rate);

    let preferential = floor_zero(preferential_income).min(taxable);
    let carve_out = if preferential > Decimal::ZERO {
        let ordinary = taxable - preferential;
        Some(
            two_rate_tax(ordinary, p.upper_threshold, p.lower_rate, p.upper_rate)
                + stacked_preferential_tax(&p.rates, ordinary, preferential),
        )
    } else {
        None
    };

    let tmt = carve_out.map_or(flat, |c| c.min(flat));
    Tentative {
        amti,
        reduction,
        exemption,
        taxable,
        flat,
        carve_out,
        tmt,
    }
}

pub fn calculate(
    inputs: &AmtInputs,
    context: &AmtContext,
    credit_entries: &[CarryoverEntry],
    status: FilingStatus,
    config: &TaxYearConfig,
) -> EngineResult<AmtBreakdown> {
    let params = AmtParameters::resolve(inputs, status, config)?;
    let base_income = context.taxable_income + context.standard_deduction;

    let adjustments_total: Decimal = inputs.adjustments.iter().map(|a| a.amount).sum();
    let full = tentative_minimum_tax(base_income + adjustments_total, context.preferential_income, &params);

    let amt_ftc = context.foreign_tax_credit.min(full.tmt);
    let tmt_after_ftc = full.tmt - amt_ftc;
    let amt_before_credit = config.round(floor_zero(tmt_after_ftc - context.regular_tax));

    let consumption = consume(
        credit_entries,
        CarryoverCategory::MinimumTaxCredit,
        amt_before_credit,
        config.tax_year,
    );
    let credit_used = config.round(consumption.amount_used);
    let amt_liability = amt_before_credit - credit_used;

    // Only deferral items earn a credit: compare against exclusion items alone
    let exclusion_total: Decimal = inputs
        .adjustments
        .iter()
        .filter(|a| a.kind.is_exclusion_item())
        .map(|a| a.amount)
        .sum();
    let exclusion_only = tentative_minimum_tax(base_income + exclusion_total, context.preferential_income, &params);
    let exclusion_amt = floor_zero(
        exclusion_only.tmt - context.foreign_tax_credit.min(exclusion_only.tmt) - context.regular_tax,
    );
    let new_credit = config.round(floor_zero(amt_before_credit - exclusion_amt));
    let new_credit_entry = (new_credit > Decimal::ZERO).then(|| {
        CarryoverEntry::new(config.tax_year, CarryoverCategory::MinimumTaxCredit, new_credit, None)
    });

    debug!(
        "6251: AMTI {} exemption {} TMT {} regular {} AMT {}",
        full.amti, full.exemption, full.tmt, context.regular_tax, amt_liability
    );

    Ok(AmtBreakdown {
        adjustments_total: config.round(adjustments_total + context.standard_deduction),
        amti: config.round(full.amti),
        exemption_base: config.round(params.exemption),
        phaseout_reduction: config.round(full.reduction),
        exemption: config.round(full.exemption),
        amt_taxable_income: config.round(full.taxable),
        tmt_without_carve_out: config.round(full.flat),
        tmt_with_carve_out: full.carve_out.map(|c| config.round(c)),
        tentative_minimum_tax: config.round(full.tmt),
        amt_foreign_tax_credit: config.round(amt_ftc),
        regular_tax: config.round(context.regular_tax),
        amt_before_credit,
        minimum_tax_credit_used: credit_used,
        amt_liability,
        new_minimum_tax_credit: new_credit,
        draws: consumption.draws,
        credit_entries: consumption.updated_entries,
        new_credit_entry,
    })
}
