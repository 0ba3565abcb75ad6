//! Schedule D netting
//!
//! Short and long-term results are netted, prior capital losses absorb net
//! gain, and a net loss is deductible only up to the annual limit with the
//! rest carried forward indefinitely.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::carryover::{consume, CarryoverCategory, CarryoverDraw, CarryoverEntry};
use crate::config::{FilingStatus, TaxYearConfig};
use crate::error::EngineResult;
use crate::money::floor_zero;

/// Capital items gathered for the year
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapitalItems {
    pub short_term: Decimal,
    pub long_term: Decimal,
    /// Subset of long-term gain taxed at most at 25%
    pub unrecaptured_1250_gain: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDBreakdown {
    pub short_term_net: Decimal,
    pub long_term_net: Decimal,
    pub net_before_carryover: Decimal,
    pub carryover_used: Decimal,
    /// Gain after carryover, or the deductible loss as a negative amount
    pub included_in_income: Decimal,
    pub capital_loss_deduction: Decimal,
    /// Long-term gain eligible for preferential rates
    pub net_capital_gain: Decimal,
    pub unrecaptured_1250_gain: Decimal,
    pub draws: Vec<CarryoverDraw>,
    pub carryover_entries: Vec<CarryoverEntry>,
    pub new_carryover: Option<CarryoverEntry>,
}

pub fn calculate(
    items: &CapitalItems,
    carryover_entries: &[CarryoverEntry],
    status: FilingStatus,
    config: &TaxYearConfig,
) -> EngineResult<ScheduleDBreakdown> {
    let tax_year = config.tax_year;
    let loss_limit = config.for_status(&config.income.capital_loss_limit, status, "income.capital_loss_limit")?;

    let net = items.short_term + items.long_term;
    let mut breakdown = ScheduleDBreakdown {
        short_term_net: config.round(items.short_term),
        long_term_net: config.round(items.long_term),
        net_before_carryover: config.round(net),
        carryover_entries: carryover_entries.to_vec(),
        ..Default::default()
    };

    if net > Decimal::ZERO {
        let consumption = consume(carryover_entries, CarryoverCategory::CapitalLoss, net, tax_year);
        let used = consumption.amount_used;
        let net_after = net - used;

        // Carried losses offset short-term gain before long-term
        let against_short = used.min(floor_zero(items.short_term));
        let long_term_after = items.long_term - (used - against_short);
        let net_capital_gain = floor_zero(long_term_after.min(net_after));

        let mut draws = consumption.draws;
        let mut entries = consumption.updated_entries;
        let mut carryover_used = used;
        let mut included = net_after;

        // Carryover left after wiping out the gain is still deductible up to the limit
        if net_after <= Decimal::ZERO {
            let leftover: Decimal = entries
                .iter()
                .filter(|e| e.category == CarryoverCategory::CapitalLoss && e.is_available_in(tax_year))
                .map(|e| e.remaining_amount)
                .sum();
            let deduction = loss_limit.min(leftover);
            if deduction > Decimal::ZERO {
                let extra = consume(&entries, CarryoverCategory::CapitalLoss, deduction, tax_year);
                carryover_used += extra.amount_used;
                draws.extend(extra.draws);
                entries = extra.updated_entries;
                breakdown.capital_loss_deduction = config.round(deduction);
                included = -deduction;
            }
        }

        breakdown.carryover_used = config.round(carryover_used);
        breakdown.included_in_income = config.round(included);
        breakdown.net_capital_gain = config.round(net_capital_gain);
        breakdown.unrecaptured_1250_gain =
            config.round(floor_zero(items.unrecaptured_1250_gain).min(net_capital_gain));
        breakdown.draws = draws;
        breakdown.carryover_entries = entries;
    } else {
        let current_loss = -net;
        let prior_available: Decimal = carryover_entries
            .iter()
            .filter(|e| e.category == CarryoverCategory::CapitalLoss && e.is_available_in(tax_year))
            .map(|e| e.remaining_amount)
            .sum();

        let deduction = loss_limit.min(current_loss + prior_available);
        let from_current = deduction.min(current_loss);
        let from_carryover = deduction - from_current;

        let consumption = consume(
            carryover_entries,
            CarryoverCategory::CapitalLoss,
            from_carryover,
            tax_year,
        );

        let unused_current = current_loss - from_current;
        if unused_current > Decimal::ZERO {
            breakdown.new_carryover = Some(CarryoverEntry::new(
                tax_year,
                CarryoverCategory::CapitalLoss,
                config.round(unused_current),
                None,
            ));
        }

        breakdown.carryover_used = config.round(consumption.amount_used);
        breakdown.capital_loss_deduction = config.round(deduction);
        breakdown.included_in_income = -breakdown.capital_loss_deduction;
        breakdown.draws = consumption.draws;
        breakdown.carryover_entries = consumption.updated_entries;
    }

    debug!(
        "Schedule D: net {} carryover used {} included {}",
        breakdown.net_before_carryover, breakdown.carryover_used, breakdown.included_in_income
    );

    Ok(breakdown)
}
