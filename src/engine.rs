//! Return orchestrator
//!
//! Runs the form modules in dependency order against one `TaxYearConfig`,
//! merges their results into income, taxable income, credits and additional
//! taxes, and builds the carryover ledger for the next year. Modules never
//! see each other's intermediate state; everything crosses through here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{FilingStatus, TaxYearConfig};
use crate::error::{EngineError, EngineResult};
use crate::money::floor_zero;
use crate::tax::amt::{self, AmtBreakdown, AmtContext, AmtInputs};
use crate::tax::brackets::{regular_tax, RegularTax};
use crate::tax::capital_gains::{self, CapitalItems, ScheduleDBreakdown};
use crate::tax::carryover::{consume, CarryoverCategory, CarryoverEntry, CarryoverLedger};
use crate::tax::debt_discharge::{self, DebtDischargeBreakdown, DebtDischargeRecords, TaxAttribute};
use crate::tax::excise::{self, EarlyDistribution, ExciseBreakdown, ExciseContext, ExcessContribution, RmdShortfall};
use crate::tax::foreign_tax::{self, ForeignIncomeRecord, ForeignTaxBreakdown};
use crate::tax::ira::{self, IraBreakdown, IraProfile};
use crate::tax::property::{self, PropertyBreakdown, PropertySaleRecord, Section179Recapture};
use crate::validation::validate_records;

/// Income facts computed upstream of the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomeFacts {
    #[serde(default)]
    pub wages: Decimal,
    #[serde(default)]
    pub taxable_interest: Decimal,
    #[serde(default)]
    pub ordinary_dividends: Decimal,
    /// Subset of ordinary dividends
    #[serde(default)]
    pub qualified_dividends: Decimal,
    #[serde(default)]
    pub other_income: Decimal,
    /// Net short-term result from Form 8949
    #[serde(default)]
    pub short_term_capital_gain: Decimal,
    /// Net long-term result from Form 8949
    #[serde(default)]
    pub long_term_capital_gain: Decimal,
    #[serde(default)]
    pub adjustments_to_income: Decimal,
    /// Standard deduction is used when absent or smaller
    #[serde(default)]
    pub itemized_deductions: Option<Decimal>,
}

/// Everything known about one return
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnRecords {
    pub tax_year: i32,
    pub filing_status: FilingStatus,
    /// Used by the excise exceptions when no IRA profile is given
    #[serde(default)]
    pub taxpayer_age: Option<Decimal>,
    #[serde(default)]
    pub income: IncomeFacts,
    #[serde(default)]
    pub property_sales: Vec<PropertySaleRecord>,
    #[serde(default)]
    pub section_179_recaptures: Vec<Section179Recapture>,
    #[serde(default)]
    pub foreign_income: Vec<ForeignIncomeRecord>,
    #[serde(default)]
    pub ira: Option<IraProfile>,
    /// Early distributions from plans other than the IRA profile
    #[serde(default)]
    pub early_distributions: Vec<EarlyDistribution>,
    #[serde(default)]
    pub excess_contributions: Vec<ExcessContribution>,
    #[serde(default)]
    pub rmd_shortfalls: Vec<RmdShortfall>,
    #[serde(default)]
    pub debt_discharge: DebtDischargeRecords,
    #[serde(default)]
    pub amt: AmtInputs,
    /// Ledger to start from when no stored snapshot exists
    #[serde(default)]
    pub prior_carryovers: Vec<CarryoverEntry>,
}

impl ReturnRecords {
    pub fn taxpayer_age(&self) -> Decimal {
        self.ira
            .as_ref()
            .map(|p| p.taxpayer_age)
            .or(self.taxpayer_age)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedBreakdown {
    pub tax_year: i32,
    pub filing_status: FilingStatus,

    pub total_income: Decimal,
    pub adjusted_gross_income: Decimal,
    pub deduction: Decimal,
    pub standard_deduction_taken: bool,
    pub taxable_income: Decimal,
    pub regular_tax: RegularTax,
    pub tax_before_credits: Decimal,
    pub ftc_credit_allowed: Decimal,
    pub tax_after_credits: Decimal,
    pub amt_liability: Decimal,
    pub excise_taxes: Decimal,
    pub total_additional_tax: Decimal,
    pub total_tax: Decimal,

    pub form_4797_ordinary_income: Decimal,
    pub form_4797_section_1231_gain: Decimal,
    pub ira_taxable_distributions: Decimal,
    pub taxable_cod_income: Decimal,

    pub property: PropertyBreakdown,
    pub ira: IraBreakdown,
    pub debt_discharge: DebtDischargeBreakdown,
    pub schedule_d: ScheduleDBreakdown,
    pub foreign_tax: ForeignTaxBreakdown,
    pub excise: ExciseBreakdown,
    pub amt: AmtBreakdown,

    pub next_year_carryovers: CarryoverLedger,
}

impl ConsolidatedBreakdown {
    /// blake3 digest of the canonical JSON form
    pub fn fingerprint(&self) -> EngineResult<String> {
        let canonical = serde_json::to_vec(self).map_err(|e| EngineError::Parse(e.to_string()))?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }
}

/// Sum of the ledger entries of `category` still usable in `tax_year`
fn ledger_balance(entries: &[CarryoverEntry], category: CarryoverCategory, tax_year: i32) -> Decimal {
    entries
        .iter()
        .filter(|e| e.category == category && e.is_available_in(tax_year))
        .map(|e| e.remaining_amount)
        .sum()
}

/// Apply an attribute reduction to the ledger, oldest entries first
fn reduce_ledger(
    ledger: &mut CarryoverLedger,
    categories: &[CarryoverCategory],
    amount: Decimal,
    tax_year: i32,
) {
    let mut remaining = amount;
    for category in categories {
        if remaining <= Decimal::ZERO {
            break;
        }
        let consumption = consume(&ledger.entries_for(*category), *category, remaining, tax_year);
        remaining -= consumption.amount_used;
        ledger.replace_category(*category, consumption.updated_entries);
    }
}

/// Calculate one return.
///
/// Validation and configuration completeness are checked before any module
/// runs; once the modules start the calculation always completes.
pub fn calculate_return(
    records: &ReturnRecords,
    prior: &CarryoverLedger,
    config: &TaxYearConfig,
) -> EngineResult<ConsolidatedBreakdown> {
    let year = config.tax_year;
    let status = records.filing_status;

    if records.tax_year != year {
        return Err(EngineError::config_missing(records.tax_year, "tax_year"));
    }
    config.check_complete(status)?;
    if let Some(issue) = validate_records(records).into_iter().next() {
        return Err(issue.into());
    }

    info!("Calculating {} return ({})", year, status.as_str());

    // Form 4797
    let property = property::calculate(
        &records.property_sales,
        &records.section_179_recaptures,
        &prior.entries_for(CarryoverCategory::Section1231Loss),
        config,
    )?;

    // Form 8606
    let ira = match &records.ira {
        Some(profile) => ira::calculate(profile, &prior.entries, config)?,
        None => IraBreakdown::default(),
    };

    // Schedule D
    let items = CapitalItems {
        short_term: records.income.short_term_capital_gain + property.personal_short_term_gain,
        long_term: records.income.long_term_capital_gain
            + property.section_1231_gain
            + property.personal_long_term_gain,
        unrecaptured_1250_gain: property.unrecaptured_1250_gain,
    };
    let schedule_d = capital_gains::calculate(
        &items,
        &prior.entries_for(CarryoverCategory::CapitalLoss),
        status,
        config,
    )?;

    // Form 982: ledger-backed attributes default to the year-end balances.
    // Credits are walked again below once the year's own use is known.
    let mut discharge_records = records.debt_discharge.clone();
    let attributes = &mut discharge_records.attributes;
    if attributes.capital_loss_carryover.is_none() {
        let carried = ledger_balance(&schedule_d.carryover_entries, CarryoverCategory::CapitalLoss, year)
            + schedule_d
                .new_carryover
                .as_ref()
                .map_or(Decimal::ZERO, |e| e.remaining_amount);
        attributes.capital_loss_carryover = Some(carried);
    }
    if attributes.minimum_tax_credit.is_none() {
        attributes.minimum_tax_credit = Some(prior.available(CarryoverCategory::MinimumTaxCredit, year));
    }
    if attributes.foreign_tax_credit.is_none() {
        attributes.foreign_tax_credit = Some(
            prior.available(CarryoverCategory::ForeignTaxPassive, year)
                + prior.available(CarryoverCategory::ForeignTaxGeneral, year),
        );
    }
    let determined_discharge = debt_discharge::calculate(&discharge_records, status, config)?;

    // Income, deductions, regular tax
    let income = &records.income;
    let total_income = config.round(
        income.wages
            + income.taxable_interest
            + income.ordinary_dividends
            + income.other_income
            + property.ordinary_income
            + ira.taxable_distributions
            + determined_discharge.taxable_cod_income
            + schedule_d.included_in_income,
    );
    let adjusted_gross_income = total_income - config.round(income.adjustments_to_income);

    let standard = config.for_status(&config.income.standard_deduction, status, "income.standard_deduction")?;
    let (deduction, standard_deduction_taken) = match income.itemized_deductions {
        Some(itemized) if itemized > standard => (config.round(itemized), false),
        _ => (standard, true),
    };
    let taxable_income = config.round(floor_zero(adjusted_gross_income - deduction));
    let preferential_income = income.qualified_dividends + schedule_d.net_capital_gain;
    let regular = regular_tax(config, status, taxable_income, preferential_income)?;

    debug!(
        "AGI {} deduction {} taxable income {} regular tax {}",
        adjusted_gross_income, deduction, taxable_income, regular.total
    );

    // Form 1116
    let ftc_entries: Vec<CarryoverEntry> = prior
        .entries
        .iter()
        .filter(|e| {
            matches!(
                e.category,
                CarryoverCategory::ForeignTaxPassive | CarryoverCategory::ForeignTaxGeneral
            )
        })
        .cloned()
        .collect();
    let foreign_tax = foreign_tax::calculate(
        &records.foreign_income,
        &ftc_entries,
        taxable_income,
        regular.total,
        status,
        config,
    )?;
    let ftc_credit_allowed = foreign_tax.credit_allowed.min(regular.total);
    let tax_after_credits = regular.total - ftc_credit_allowed;

    // Form 5329
    let mut early_distributions = records.early_distributions.clone();
    early_distributions.extend(ira.early_distributions.iter().cloned());
    let excise = excise::calculate(
        &early_distributions,
        &records.excess_contributions,
        &records.rmd_shortfalls,
        &ExciseContext {
            taxpayer_age: records.taxpayer_age(),
            adjusted_gross_income,
        },
        config,
    )?;

    // Form 6251
    let amt_context = AmtContext {
        taxable_income,
        standard_deduction: if standard_deduction_taken { deduction } else { Decimal::ZERO },
        preferential_income: regular.preferential_income,
        regular_tax: tax_after_credits,
        foreign_tax_credit: ftc_credit_allowed,
    };
    let amt = amt::calculate(
        &records.amt,
        &amt_context,
        &prior.entries_for(CarryoverCategory::MinimumTaxCredit),
        status,
        config,
    )?;

    // Ledger merge
    let mut ledger = prior.clone();
    ledger.replace_category(CarryoverCategory::Section1231Loss, property.lookback_entries.clone());
    if let Some(entry) = &property.new_lookback_loss {
        ledger.push(entry.clone());
    }
    ledger.replace_category(CarryoverCategory::CapitalLoss, schedule_d.carryover_entries.clone());
    if let Some(entry) = &schedule_d.new_carryover {
        ledger.push(entry.clone());
    }
    for category in [CarryoverCategory::ForeignTaxPassive, CarryoverCategory::ForeignTaxGeneral] {
        ledger.replace_category(category, foreign_tax.carryover_entries.clone());
    }
    for entry in &foreign_tax.new_carryovers {
        ledger.push(entry.clone());
    }
    if records.ira.is_some() {
        ledger.replace_category(CarryoverCategory::TraditionalIraBasis, ira.traditional_basis_entries.clone());
        ledger.replace_category(CarryoverCategory::RothContributionBasis, ira.roth_basis_entries.clone());
    }
    ledger.replace_category(CarryoverCategory::MinimumTaxCredit, amt.credit_entries.clone());
    if let Some(entry) = &amt.new_credit_entry {
        ledger.push(entry.clone());
    }

    // Attribute reductions land after the year's own use
    let credits_from_ledger = records.debt_discharge.attributes.minimum_tax_credit.is_none()
        || records.debt_discharge.attributes.foreign_tax_credit.is_none();
    let debt_discharge = if credits_from_ledger && !discharge_records.cases.is_empty() {
        let attributes = &mut discharge_records.attributes;
        if records.debt_discharge.attributes.minimum_tax_credit.is_none() {
            attributes.minimum_tax_credit = Some(ledger.available(CarryoverCategory::MinimumTaxCredit, year + 1));
        }
        if records.debt_discharge.attributes.foreign_tax_credit.is_none() {
            attributes.foreign_tax_credit = Some(
                ledger.available(CarryoverCategory::ForeignTaxPassive, year + 1)
                    + ledger.available(CarryoverCategory::ForeignTaxGeneral, year + 1),
            );
        }
        debt_discharge::reduce_after_use(&determined_discharge, &discharge_records, config)?
    } else {
        determined_discharge
    };

    reduce_ledger(
        &mut ledger,
        &[CarryoverCategory::CapitalLoss],
        debt_discharge.reduction_of(TaxAttribute::CapitalLossCarryover),
        year + 1,
    );
    reduce_ledger(
        &mut ledger,
        &[CarryoverCategory::MinimumTaxCredit],
        debt_discharge.reduction_of(TaxAttribute::MinimumTaxCredit),
        year + 1,
    );
    reduce_ledger(
        &mut ledger,
        &[CarryoverCategory::ForeignTaxGeneral, CarryoverCategory::ForeignTaxPassive],
        debt_discharge.reduction_of(TaxAttribute::ForeignTaxCredit),
        year + 1,
    );

    let next_year_carryovers = ledger.roll_forward(year + 1);

    let excise_taxes = excise.total;
    let total_additional_tax = excise_taxes + amt.amt_liability;
    let total_tax = tax_after_credits + total_additional_tax;

    info!(
        "{} return: taxable income {} total tax {}",
        year, taxable_income, total_tax
    );

    Ok(ConsolidatedBreakdown {
        tax_year: year,
        filing_status: status,
        total_income,
        adjusted_gross_income,
        deduction,
        standard_deduction_taken,
        taxable_income,
        tax_before_credits: regular.total,
        regular_tax: regular,
        ftc_credit_allowed,
        tax_after_credits,
        amt_liability: amt.amt_liability,
        excise_taxes,
        total_additional_tax,
        total_tax,
        form_4797_ordinary_income: property.ordinary_income,
        form_4797_section_1231_gain: property.section_1231_gain,
        ira_taxable_distributions: ira.taxable_distributions,
        taxable_cod_income: debt_discharge.taxable_cod_income,
        property,
        ira,
        debt_discharge,
        schedule_d,
        foreign_tax,
        excise,
        amt,
        next_year_carryovers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> TaxYearConfig {
        TaxYearConfig::builtin(2025).unwrap()
    }

    fn wages_only(wages: Decimal) -> ReturnRecords {
        ReturnRecords {
            tax_year: 2025,
            filing_status: FilingStatus::Single,
            income: IncomeFacts {
                wages,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_wages_only_return() {
        let result = calculate_return(&wages_only(dec!(115750)), &CarryoverLedger::default(), &config()).unwrap();

        assert_eq!(result.adjusted_gross_income, dec!(115750));
        assert!(result.standard_deduction_taken);
        assert_eq!(result.taxable_income, dec!(100000));
        assert_eq!(result.tax_before_credits, dec!(16914.00));
        assert_eq!(result.amt_liability, dec!(0));
        assert_eq!(result.total_tax, dec!(16914.00));
        assert!(result.next_year_carryovers.entries.is_empty());
    }

    #[test]
    fn test_year_mismatch_is_configuration_missing() {
        let mut records = wages_only(dec!(1000));
        records.tax_year = 2024;
        let err = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationMissing { tax_year: 2024, .. }));
    }

    #[test]
    fn test_invalid_record_stops_before_modules() {
        let mut records = wages_only(dec!(1000));
        records.income.taxable_interest = dec!(-1);
        let err = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecord { .. }));
    }

    #[test]
    fn test_itemized_used_only_when_larger() {
        let mut records = wages_only(dec!(100000));
        records.income.itemized_deductions = Some(dec!(9000));
        let result = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap();
        assert!(result.standard_deduction_taken);
        assert_eq!(result.deduction, dec!(15750));

        records.income.itemized_deductions = Some(dec!(30000));
        let result = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap();
        assert!(!result.standard_deduction_taken);
        assert_eq!(result.taxable_income, dec!(70000));
    }

    #[test]
    fn test_debt_reduction_applied_to_next_year_ledger() {
        use crate::tax::debt_discharge::{DebtDischargeCase, ExclusionType};

        let mut records = wages_only(dec!(60000));
        records.debt_discharge.cases.push(DebtDischargeCase {
            description: "Bankruptcy discharge".to_string(),
            cod_income: dec!(4000),
            exclusion_type: ExclusionType::Bankruptcy,
            balance_sheet: None,
            qrpbi: None,
            qualified_property_basis: dec!(0),
            residence_basis: dec!(0),
            elect_basis_first: false,
        });
        let prior = CarryoverLedger::new(vec![CarryoverEntry::new(
            2022,
            CarryoverCategory::CapitalLoss,
            dec!(10000),
            None,
        )]);

        let result = calculate_return(&records, &prior, &config()).unwrap();

        // 3000 used against ordinary income, 4000 of the remaining 7000 removed
        assert_eq!(result.schedule_d.capital_loss_deduction, dec!(3000));
        assert_eq!(result.taxable_cod_income, dec!(0));
        assert_eq!(
            result.next_year_carryovers.available(CarryoverCategory::CapitalLoss, 2026),
            dec!(3000)
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let records = wages_only(dec!(85000));
        let a = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap();
        let b = calculate_return(&records, &CarryoverLedger::default(), &config()).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }
}
