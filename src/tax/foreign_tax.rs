//! Foreign tax credit limitation (Form 1116)
//!
//! Each category is limited to its share of the tax before credits. Excess
//! foreign tax carries forward; unused limitation room pulls in older
//! carryforwards of the same category.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::carryover::{consume, CarryoverCategory, CarryoverDraw, CarryoverEntry};
use crate::config::{FilingStatus, TaxYearConfig};
use crate::error::EngineResult;
use crate::money::{floor_zero, ratio};

/// Separate limitation category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ForeignTaxCategory {
    Passive,
    General,
}

impl ForeignTaxCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForeignTaxCategory::Passive => "passive",
            ForeignTaxCategory::General => "general",
        }
    }

    pub fn carryover_category(&self) -> CarryoverCategory {
        match self {
            ForeignTaxCategory::Passive => CarryoverCategory::ForeignTaxPassive,
            ForeignTaxCategory::General => CarryoverCategory::ForeignTaxGeneral,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountryTax {
    pub country: String,
    pub tax_paid: Decimal,
}

/// Foreign income and taxes of one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignIncomeRecord {
    pub category: ForeignTaxCategory,
    pub gross_foreign_income: Decimal,
    #[serde(default)]
    pub allocated_deductions: Decimal,
    #[serde(default)]
    pub country_taxes: Vec<CountryTax>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryResult {
    pub category: ForeignTaxCategory,
    pub net_foreign_income: Decimal,
    pub foreign_tax_paid: Decimal,
    pub country_taxes: Vec<CountryTax>,
    pub limitation_ratio: Decimal,
    pub limitation: Decimal,
    pub credit_from_current_year: Decimal,
    pub carryover_used: Decimal,
    pub credit_allowed: Decimal,
    pub new_carryforward: Decimal,
    pub draws: Vec<CarryoverDraw>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ForeignTaxBreakdown {
    pub simplified_method: bool,
    pub categories: Vec<CategoryResult>,
    pub total_foreign_tax_paid: Decimal,
    pub total_limitation: Decimal,
    pub credit_allowed: Decimal,
    pub carryover_used: Decimal,
    pub new_carryforward: Decimal,
    /// Ledger entries of both categories with updated balances
    pub carryover_entries: Vec<CarryoverEntry>,
    pub new_carryovers: Vec<CarryoverEntry>,
}

struct MergedCategory {
    gross: Decimal,
    deductions: Decimal,
    countries: BTreeMap<String, Decimal>,
}

fn merge_by_category(records: &[ForeignIncomeRecord]) -> BTreeMap<ForeignTaxCategory, MergedCategory> {
    let mut merged: BTreeMap<ForeignTaxCategory, MergedCategory> = BTreeMap::new();
    for record in records {
        let entry = merged.entry(record.category).or_insert_with(|| MergedCategory {
            gross: Decimal::ZERO,
            deductions: Decimal::ZERO,
            countries: BTreeMap::new(),
        });
        entry.gross += record.gross_foreign_income;
        entry.deductions += record.allocated_deductions;
        for tax in &record.country_taxes {
            *entry.countries.entry(tax.country.clone()).or_insert(Decimal::ZERO) += tax.tax_paid;
        }
    }
    merged
}

/// Whether the credit may be taken without Form 1116.
///
/// The threshold is inclusive: foreign tax of exactly the status amount
/// still qualifies.
pub fn simplified_method_eligible(
    records: &[ForeignIncomeRecord],
    status: FilingStatus,
    config: &TaxYearConfig,
) -> EngineResult<bool> {
    let threshold = config.for_status(
        &config.foreign_tax.simplified_threshold,
        status,
        "foreign_tax.simplified_threshold",
    )?;
    let total_paid: Decimal = records
        .iter()
        .flat_map(|r| r.country_taxes.iter())
        .map(|t| t.tax_paid)
        .sum();
    let all_passive = records
        .iter()
        .all(|r| r.category == ForeignTaxCategory::Passive);

    Ok(!records.is_empty() && all_passive && total_paid <= threshold)
}

/// Compute the credit for the year.
///
/// `carryover_entries` holds prior FTC carryforwards of either category;
/// the simplified method leaves them untouched.
pub fn calculate(
    records: &[ForeignIncomeRecord],
    carryover_entries: &[CarryoverEntry],
    total_taxable_income: Decimal,
    tax_before_credits: Decimal,
    status: FilingStatus,
    config: &TaxYearConfig,
) -> EngineResult<ForeignTaxBreakdown> {
    let tax_year = config.tax_year;
    let carryforward_years =
        config.require(config.foreign_tax.carryforward_years, "foreign_tax.carryforward_years")?;

    let mut breakdown = ForeignTaxBreakdown {
        carryover_entries: carryover_entries.to_vec(),
        ..Default::default()
    };
    if records.is_empty() {
        return Ok(breakdown);
    }

    let merged = merge_by_category(records);

    if simplified_method_eligible(records, status, config)? {
        breakdown.simplified_method = true;
        for (category, m) in &merged {
            let paid: Decimal = m.countries.values().copied().sum();
            let paid = config.round(paid);
            breakdown.categories.push(CategoryResult {
                category: *category,
                net_foreign_income: config.round(floor_zero(m.gross - m.deductions)),
                foreign_tax_paid: paid,
                country_taxes: country_list(&m.countries, config),
                limitation_ratio: Decimal::ONE,
                limitation: paid,
                credit_from_current_year: paid,
                carryover_used: Decimal::ZERO,
                credit_allowed: paid,
                new_carryforward: Decimal::ZERO,
                draws: Vec::new(),
            });
            breakdown.total_foreign_tax_paid += paid;
            breakdown.total_limitation += paid;
            breakdown.credit_allowed += paid;
        }
        debug!("FTC simplified method: credit {}", breakdown.credit_allowed);
        return Ok(breakdown);
    }

    let mut entries = carryover_entries.to_vec();

    for (category, m) in &merged {
        let net_foreign_income = floor_zero(m.gross - m.deductions);
        let paid: Decimal = m.countries.values().copied().sum();
        let limitation_ratio = ratio(net_foreign_income, total_taxable_income);
        let limitation = config.round(tax_before_credits * limitation_ratio);

        let credit_from_current_year = config.round(paid.min(limitation));
        let new_carryforward = config.round(floor_zero(paid - credit_from_current_year));
        let room = floor_zero(limitation - credit_from_current_year);

        let consumption = consume(&entries, category.carryover_category(), room, tax_year);
        entries = consumption.updated_entries;
        let carryover_used = config.round(consumption.amount_used);
        let credit_allowed = credit_from_current_year + carryover_used;

        if new_carryforward > Decimal::ZERO {
            breakdown.new_carryovers.push(CarryoverEntry::new(
                tax_year,
                category.carryover_category(),
                new_carryforward,
                Some(carryforward_years),
            ));
        }

        debug!(
            "FTC {}: income {} paid {} limitation {} credit {} carryforward {}",
            category.as_str(),
            net_foreign_income,
            paid,
            limitation,
            credit_allowed,
            new_carryforward
        );

        breakdown.total_foreign_tax_paid += config.round(paid);
        breakdown.total_limitation += limitation;
        breakdown.credit_allowed += credit_allowed;
        breakdown.carryover_used += carryover_used;
        breakdown.new_carryforward += new_carryforward;
        breakdown.categories.push(CategoryResult {
            category: *category,
            net_foreign_income: config.round(net_foreign_income),
            foreign_tax_paid: config.round(paid),
            country_taxes: country_list(&m.countries, config),
            limitation_ratio,
            limitation,
            credit_from_current_year,
            carryover_used,
            credit_allowed,
            new_carryforward,
            draws: consumption.draws,
        });
    }

    breakdown.carryover_entries = entries;
    Ok(breakdown)
}

fn country_list(countries: &BTreeMap<String, Decimal>, config: &TaxYearConfig) -> Vec<CountryTax> {
    countries
        .iter()
        .map(|(country, paid)| CountryTax {
            country: country.clone(),
            tax_paid: config.round(*paid),
        })
        .collect()
}
