//! Business property dispositions (Form 4797)
//!
//! Each sale is classified by holding period and property class, its gain
//! split into depreciation recapture, unrecaptured §1250 gain and §1231
//! gain, and the long-term §1231 amounts are then netted and run through the
//! five-year lookback against prior unrecaptured §1231 losses.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::carryover::{consume, CarryoverCategory, CarryoverDraw, CarryoverEntry};
use crate::config::TaxYearConfig;
use crate::error::EngineResult;
use crate::money::floor_zero;

/// Recapture class of the property sold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PropertyClass {
    /// Depreciable personal property (equipment, vehicles)
    Section1245,
    /// Depreciable real property
    Section1250,
    /// Other §1231 property, e.g. land used in a business
    Section1231Other,
}

impl PropertyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyClass::Section1245 => "§1245",
            PropertyClass::Section1250 => "§1250",
            PropertyClass::Section1231Other => "§1231",
        }
    }

    pub fn is_depreciable(&self) -> bool {
        !matches!(self, PropertyClass::Section1231Other)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

fn full_business_use() -> Decimal {
    Decimal::ONE
}

/// A sale or exchange of business property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySaleRecord {
    pub description: String,
    pub property_class: PropertyClass,
    pub acquired_date: NaiveDate,
    pub disposed_date: NaiveDate,
    /// Cost or other basis before depreciation
    pub basis: Decimal,
    /// Ordinary + §179 + bonus depreciation allowed
    #[serde(default)]
    pub depreciation_taken: Decimal,
    /// Straight-line equivalent of `depreciation_taken` (§1250 only)
    #[serde(default)]
    pub straight_line_depreciation: Option<Decimal>,
    pub proceeds: Decimal,
    #[serde(default)]
    pub selling_costs: Decimal,
    /// Share of the property used in the business, in [0, 1]
    #[serde(default = "full_business_use")]
    pub business_use_pct: Decimal,
}

impl PropertySaleRecord {
    pub fn holding_days(&self) -> i64 {
        (self.disposed_date - self.acquired_date).num_days()
    }

    pub fn holding_period(&self, long_term_after_days: i64) -> HoldingPeriod {
        if self.holding_days() > long_term_after_days {
            HoldingPeriod::LongTerm
        } else {
            HoldingPeriod::ShortTerm
        }
    }

    pub fn amount_realized(&self) -> Decimal {
        self.proceeds - self.selling_costs
    }

    pub fn adjusted_basis(&self) -> Decimal {
        self.basis - self.depreciation_taken
    }

    pub fn realized_gain(&self) -> Decimal {
        self.amount_realized() - self.adjusted_basis()
    }

    /// Gain or loss on the business share; all depreciation belongs here
    pub fn business_gain(&self) -> Decimal {
        let share = self.business_use_pct;
        self.amount_realized() * share - (self.basis * share - self.depreciation_taken)
    }

    /// Gain or loss on the personal-use share
    pub fn personal_gain(&self) -> Decimal {
        let share = Decimal::ONE - self.business_use_pct;
        (self.amount_realized() - self.basis) * share
    }
}

/// Recapture of a §179 deduction after business use dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section179Recapture {
    pub description: String,
    pub section_179_deduction: Decimal,
    /// Depreciation that would have been allowable without the §179 election
    pub allowable_depreciation: Decimal,
    /// Business use in the current year, in [0, 1]
    pub business_use_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section179RecaptureResult {
    pub description: String,
    pub recapture: Decimal,
}

/// Per-sale classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispositionResult {
    pub description: String,
    pub property_class: PropertyClass,
    pub holding_period: HoldingPeriod,
    pub amount_realized: Decimal,
    pub adjusted_basis: Decimal,
    pub gain_or_loss: Decimal,
    /// §1245 full / §1250 additional-depreciation recapture
    pub ordinary_recapture: Decimal,
    /// Straight-line depreciation recovered by the gain (25% group)
    pub unrecaptured_1250_gain: Decimal,
    /// Amount entering §1231 netting (gain positive, loss negative)
    pub section_1231_amount: Decimal,
    /// Short-term business gain or loss, always ordinary
    pub ordinary_gain_or_loss: Decimal,
    pub personal_capital_gain: Decimal,
    pub nondeductible_personal_loss: Decimal,
}

/// Form 4797 totals for the year
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PropertyBreakdown {
    pub dispositions: Vec<DispositionResult>,
    pub section_179_recaptures: Vec<Section179RecaptureResult>,
    pub depreciation_recapture: Decimal,
    pub short_term_ordinary: Decimal,
    pub section_1231_gains: Decimal,
    pub section_1231_losses: Decimal,
    pub net_section_1231: Decimal,
    pub lookback_recapture: Decimal,
    /// Net §1231 gain treated as long-term capital gain
    pub section_1231_gain: Decimal,
    /// Net §1231 loss treated as ordinary loss (positive number)
    pub section_1231_ordinary_loss: Decimal,
    pub unrecaptured_1250_gain: Decimal,
    pub section_179_recapture: Decimal,
    /// Part II total: recapture + short-term + lookback + §179 − net §1231 loss
    pub ordinary_income: Decimal,
    pub personal_long_term_gain: Decimal,
    pub personal_short_term_gain: Decimal,
    pub nondeductible_personal_loss: Decimal,
    pub lookback_draws: Vec<CarryoverDraw>,
    pub lookback_entries: Vec<CarryoverEntry>,
    pub new_lookback_loss: Option<CarryoverEntry>,
}

/// Classify one sale
pub fn classify_disposition(
    record: &PropertySaleRecord,
    long_term_after_days: i64,
    config: &TaxYearConfig,
) -> DispositionResult {
    let holding_period = record.holding_period(long_term_after_days);
    let gain = record.business_gain();
    let depreciation = record.depreciation_taken;

    let mut ordinary_recapture = Decimal::ZERO;
    let mut unrecaptured_1250_gain = Decimal::ZERO;
    let mut section_1231_amount = Decimal::ZERO;
    let mut ordinary_gain_or_loss = Decimal::ZERO;

    match holding_period {
        HoldingPeriod::ShortTerm => {
            ordinary_gain_or_loss = gain;
        }
        HoldingPeriod::LongTerm if gain > Decimal::ZERO => match record.property_class {
            PropertyClass::Section1245 => {
                ordinary_recapture = gain.min(depreciation);
                section_1231_amount = gain - ordinary_recapture;
            }
            PropertyClass::Section1250 => {
                let straight_line = record.straight_line_depreciation.unwrap_or(depreciation);
                let additional = floor_zero(depreciation - straight_line);
                ordinary_recapture = gain.min(additional);
                let remaining_gain = gain - ordinary_recapture;
                unrecaptured_1250_gain = remaining_gain.min(floor_zero(depreciation - ordinary_recapture));
                section_1231_amount = remaining_gain;
            }
            PropertyClass::Section1231Other => {
                section_1231_amount = gain;
            }
        },
        HoldingPeriod::LongTerm => {
            section_1231_amount = gain;
        }
    }

    let personal = record.personal_gain();
    let (personal_capital_gain, nondeductible_personal_loss) = if personal > Decimal::ZERO {
        (personal, Decimal::ZERO)
    } else {
        (Decimal::ZERO, -personal)
    };

    DispositionResult {
        description: record.description.clone(),
        property_class: record.property_class,
        holding_period,
        amount_realized: config.round(record.amount_realized()),
        adjusted_basis: config.round(record.adjusted_basis()),
        gain_or_loss: config.round(record.realized_gain()),
        ordinary_recapture: config.round(ordinary_recapture),
        unrecaptured_1250_gain: config.round(unrecaptured_1250_gain),
        section_1231_amount: config.round(section_1231_amount),
        ordinary_gain_or_loss: config.round(ordinary_gain_or_loss),
        personal_capital_gain: config.round(personal_capital_gain),
        nondeductible_personal_loss: config.round(nondeductible_personal_loss),
    }
}

/// §179 recapture: deduction in excess of what depreciation would have
/// allowed, once business use falls to the threshold or below
pub fn section_179_recapture(record: &Section179Recapture, threshold: Decimal) -> Decimal {
    if record.business_use_pct > threshold {
        return Decimal::ZERO;
    }
    floor_zero(record.section_179_deduction - record.allowable_depreciation)
}

/// Compute Form 4797 for the year.
///
/// `lookback_entries` are the prior unrecaptured §1231 losses; the returned
/// breakdown carries their updated balances and, for a net loss year, the
/// new entry to add.
pub fn calculate(
    sales: &[PropertySaleRecord],
    recaptures: &[Section179Recapture],
    lookback_entries: &[CarryoverEntry],
    config: &TaxYearConfig,
) -> EngineResult<PropertyBreakdown> {
    let tax_year = config.tax_year;
    let long_term_after_days =
        config.require(config.property.long_term_holding_days, "property.long_term_holding_days")?;
    let lookback_years = config.require(
        config.property.section_1231_lookback_years,
        "property.section_1231_lookback_years",
    )?;
    let business_use_threshold = config.require(
        config.property.section_179_business_use_threshold,
        "property.section_179_business_use_threshold",
    )?;

    let mut breakdown = PropertyBreakdown {
        lookback_entries: lookback_entries.to_vec(),
        ..Default::default()
    };

    for record in sales {
        let result = classify_disposition(record, long_term_after_days, config);
        debug!(
            "4797 {}: {:?} gain {} recapture {} §1231 {}",
            result.description,
            result.holding_period,
            result.gain_or_loss,
            result.ordinary_recapture,
            result.section_1231_amount
        );

        breakdown.depreciation_recapture += result.ordinary_recapture;
        breakdown.short_term_ordinary += result.ordinary_gain_or_loss;
        breakdown.unrecaptured_1250_gain += result.unrecaptured_1250_gain;
        breakdown.nondeductible_personal_loss += result.nondeductible_personal_loss;
        match result.holding_period {
            HoldingPeriod::LongTerm => {
                breakdown.personal_long_term_gain += result.personal_capital_gain;
                if result.section_1231_amount >= Decimal::ZERO {
                    breakdown.section_1231_gains += result.section_1231_amount;
                } else {
                    breakdown.section_1231_losses -= result.section_1231_amount;
                }
            }
            HoldingPeriod::ShortTerm => {
                breakdown.personal_short_term_gain += result.personal_capital_gain;
            }
        }
        breakdown.dispositions.push(result);
    }

    for record in recaptures {
        let recapture = config.round(section_179_recapture(record, business_use_threshold));
        breakdown.section_179_recapture += recapture;
        breakdown.section_179_recaptures.push(Section179RecaptureResult {
            description: record.description.clone(),
            recapture,
        });
    }

    breakdown.net_section_1231 = breakdown.section_1231_gains - breakdown.section_1231_losses;

    if breakdown.net_section_1231 >= Decimal::ZERO {
        let consumption = consume(
            lookback_entries,
            CarryoverCategory::Section1231Loss,
            breakdown.net_section_1231,
            tax_year,
        );
        breakdown.lookback_recapture = consumption.amount_used;
        breakdown.section_1231_gain = breakdown.net_section_1231 - consumption.amount_used;
        breakdown.lookback_draws = consumption.draws;
        breakdown.lookback_entries = consumption.updated_entries;

        // Recaptured lookback gain comes out of the 25% group first
        breakdown.unrecaptured_1250_gain = floor_zero(
            breakdown.unrecaptured_1250_gain - breakdown.lookback_recapture,
        )
        .min(breakdown.section_1231_gain);
    } else {
        let net_loss = -breakdown.net_section_1231;
        breakdown.section_1231_ordinary_loss = net_loss;
        breakdown.unrecaptured_1250_gain = Decimal::ZERO;
        breakdown.new_lookback_loss = Some(CarryoverEntry::new(
            tax_year,
            CarryoverCategory::Section1231Loss,
            net_loss,
            Some(lookback_years),
        ));
    }

    breakdown.ordinary_income = breakdown.depreciation_recapture
        + breakdown.short_term_ordinary
        + breakdown.lookback_recapture
        + breakdown.section_179_recapture
        - breakdown.section_1231_ordinary_loss;

    Ok(breakdown)
}
