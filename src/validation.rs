//! Record validation
//!
//! Runs before any module and collects every issue instead of stopping at
//! the first one, so the `validate` command can report them all at once.
//! `calculate_return` surfaces the first issue as `InvalidRecord`.

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::ReturnRecords;
use crate::error::EngineError;
use crate::tax::debt_discharge::ExclusionType;
use crate::tax::property::PropertyClass;

/// A problem with one input record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Record identifier, e.g. `property_sales[2] (Warehouse)`
    pub record: String,
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ValidationIssue {
    pub fn new(
        record: impl Into<String>,
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            record: record.into(),
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ValidationIssue> for EngineError {
    fn from(issue: ValidationIssue) -> Self {
        EngineError::InvalidRecord {
            record: issue.record,
            field: issue.field,
            reason: format!("{} (got {})", issue.reason, issue.value),
        }
    }
}

struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn non_negative(&mut self, record: &str, field: &str, value: Decimal) {
        if value < Decimal::ZERO {
            self.issues
                .push(ValidationIssue::new(record, field, value, "must not be negative"));
        }
    }

    fn fraction(&mut self, record: &str, field: &str, value: Decimal) {
        if value < Decimal::ZERO || value > Decimal::ONE {
            self.issues
                .push(ValidationIssue::new(record, field, value, "must be between 0 and 1"));
        }
    }
}

/// Validate every record of a return
pub fn validate_records(records: &ReturnRecords) -> Vec<ValidationIssue> {
    let mut c = Collector { issues: Vec::new() };
    let year = records.tax_year;

    let income = &records.income;
    for (field, value) in [
        ("income.wages", income.wages),
        ("income.taxable_interest", income.taxable_interest),
        ("income.ordinary_dividends", income.ordinary_dividends),
        ("income.qualified_dividends", income.qualified_dividends),
        ("income.adjustments_to_income", income.adjustments_to_income),
    ] {
        c.non_negative("income", field, value);
    }
    if income.qualified_dividends > income.ordinary_dividends {
        c.issues.push(ValidationIssue::new(
            "income",
            "income.qualified_dividends",
            income.qualified_dividends,
            "cannot exceed ordinary dividends",
        ));
    }
    if let Some(itemized) = income.itemized_deductions {
        c.non_negative("income", "income.itemized_deductions", itemized);
    }

    for (i, sale) in records.property_sales.iter().enumerate() {
        let record = format!("property_sales[{}] ({})", i, sale.description);
        c.non_negative(&record, "basis", sale.basis);
        c.non_negative(&record, "depreciation_taken", sale.depreciation_taken);
        c.non_negative(&record, "proceeds", sale.proceeds);
        c.non_negative(&record, "selling_costs", sale.selling_costs);
        c.fraction(&record, "business_use_pct", sale.business_use_pct);

        if sale.disposed_date < sale.acquired_date {
            c.issues.push(ValidationIssue::new(
                &record,
                "disposed_date",
                sale.disposed_date,
                format!("disposed before acquired ({})", sale.acquired_date),
            ));
        }
        if sale.disposed_date.year() != year {
            c.issues.push(ValidationIssue::new(
                &record,
                "disposed_date",
                sale.disposed_date,
                format!("not in tax year {}", year),
            ));
        }
        if sale.depreciation_taken > sale.basis * sale.business_use_pct {
            c.issues.push(ValidationIssue::new(
                &record,
                "depreciation_taken",
                sale.depreciation_taken,
                "exceeds the business share of basis",
            ));
        }
        if !sale.property_class.is_depreciable() && sale.depreciation_taken > Decimal::ZERO {
            c.issues.push(ValidationIssue::new(
                &record,
                "depreciation_taken",
                sale.depreciation_taken,
                "non-depreciable property cannot carry depreciation",
            ));
        }
        if let Some(straight_line) = sale.straight_line_depreciation {
            if sale.property_class != PropertyClass::Section1250 {
                c.issues.push(ValidationIssue::new(
                    &record,
                    "straight_line_depreciation",
                    straight_line,
                    "only applies to §1250 property",
                ));
            } else if straight_line < Decimal::ZERO || straight_line > sale.depreciation_taken {
                c.issues.push(ValidationIssue::new(
                    &record,
                    "straight_line_depreciation",
                    straight_line,
                    "must be between 0 and depreciation taken",
                ));
            }
        }
    }

    for (i, recapture) in records.section_179_recaptures.iter().enumerate() {
        let record = format!("section_179_recaptures[{}] ({})", i, recapture.description);
        c.non_negative(&record, "section_179_deduction", recapture.section_179_deduction);
        c.non_negative(&record, "allowable_depreciation", recapture.allowable_depreciation);
        c.fraction(&record, "business_use_pct", recapture.business_use_pct);
    }

    for (i, foreign) in records.foreign_income.iter().enumerate() {
        let record = format!("foreign_income[{}] ({})", i, foreign.category.as_str());
        c.non_negative(&record, "gross_foreign_income", foreign.gross_foreign_income);
        c.non_negative(&record, "allocated_deductions", foreign.allocated_deductions);
        for tax in &foreign.country_taxes {
            if tax.country.trim().is_empty() {
                c.issues
                    .push(ValidationIssue::new(&record, "country_taxes.country", "", "country is required"));
            }
            c.non_negative(&record, "country_taxes.tax_paid", tax.tax_paid);
        }
    }

    if let Some(ira) = &records.ira {
        let record = "ira";
        c.non_negative(record, "taxpayer_age", ira.taxpayer_age);
        for (field, value) in [
            ("nondeductible_contributions", ira.nondeductible_contributions),
            ("year_end_value", ira.year_end_value),
            ("traditional_distributions", ira.traditional_distributions),
            ("roth_conversions", ira.roth_conversions),
            ("roth_contributions", ira.roth_contributions),
            ("roth_distributions", ira.roth_distributions),
            ("first_home_amount", ira.first_home_amount),
            ("prior_first_home_used", ira.prior_first_home_used),
        ] {
            c.non_negative(record, field, value);
        }
        if let Some(basis) = ira.prior_year_basis {
            c.non_negative(record, "prior_year_basis", basis);
        }
        if let Some(basis) = ira.prior_roth_contribution_basis {
            c.non_negative(record, "prior_roth_contribution_basis", basis);
        }
        if let Some(first) = ira.first_roth_contribution_year {
            if first > year {
                c.issues.push(ValidationIssue::new(
                    record,
                    "first_roth_contribution_year",
                    first,
                    format!("after tax year {}", year),
                ));
            }
        }
        for layer in &ira.conversion_layers {
            if layer.conversion_year >= year {
                c.issues.push(ValidationIssue::new(
                    record,
                    "conversion_layers.conversion_year",
                    layer.conversion_year,
                    "prior layers must predate the tax year",
                ));
            }
            c.non_negative(record, "conversion_layers.taxable_amount", layer.taxable_amount);
            c.non_negative(record, "conversion_layers.nontaxable_amount", layer.nontaxable_amount);
        }
    }

    for (i, dist) in records.early_distributions.iter().enumerate() {
        let record = format!("early_distributions[{}] ({})", i, dist.description);
        c.non_negative(&record, "gross_amount", dist.gross_amount);
        c.non_negative(&record, "taxable_amount", dist.taxable_amount);
        if dist.taxable_amount > dist.gross_amount {
            c.issues.push(ValidationIssue::new(
                &record,
                "taxable_amount",
                dist.taxable_amount,
                "exceeds gross amount",
            ));
        }
        if let Some(claim) = dist.exception {
            c.non_negative(&record, "exception.amount", claim.amount);
        }
    }

    for (i, excess) in records.excess_contributions.iter().enumerate() {
        let record = format!("excess_contributions[{}] ({})", i, excess.account_type.as_str());
        for (field, value) in [
            ("current_year_excess", excess.current_year_excess),
            ("prior_year_excess", excess.prior_year_excess),
            ("unused_contribution_room", excess.unused_contribution_room),
            ("withdrawn_timely", excess.withdrawn_timely),
            ("recharacterized", excess.recharacterized),
        ] {
            c.non_negative(&record, field, value);
        }
    }

    for (i, rmd) in records.rmd_shortfalls.iter().enumerate() {
        let record = format!("rmd_shortfalls[{}] ({})", i, rmd.description);
        c.non_negative(&record, "required", rmd.required);
        c.non_negative(&record, "actual", rmd.actual);
    }

    for (i, case) in records.debt_discharge.cases.iter().enumerate() {
        let record = format!("debt_discharge.cases[{}] ({})", i, case.description);
        c.non_negative(&record, "cod_income", case.cod_income);
        match case.exclusion_type {
            ExclusionType::Insolvency if case.balance_sheet.is_none() => {
                c.issues.push(ValidationIssue::new(
                    &record,
                    "balance_sheet",
                    "none",
                    "required for insolvency exclusion",
                ));
            }
            ExclusionType::Qrpbi if case.qrpbi.is_none() => {
                c.issues
                    .push(ValidationIssue::new(&record, "qrpbi", "none", "required for QRPBI exclusion"));
            }
            _ => {}
        }
        if let Some(sheet) = case.balance_sheet {
            c.non_negative(&record, "balance_sheet.total_liabilities", sheet.total_liabilities);
            c.non_negative(&record, "balance_sheet.total_assets_fmv", sheet.total_assets_fmv);
        }
    }

    let attrs = &records.debt_discharge.attributes;
    for (field, value) in [
        ("net_operating_loss", attrs.net_operating_loss),
        ("general_business_credit", attrs.general_business_credit),
        ("property_basis", attrs.property_basis),
        ("depreciable_basis", attrs.depreciable_basis),
        ("liabilities_after_discharge", attrs.liabilities_after_discharge),
        ("passive_activity_loss", attrs.passive_activity_loss),
        ("passive_activity_credit", attrs.passive_activity_credit),
    ] {
        c.non_negative("debt_discharge.attributes", field, value);
    }

    for (i, entry) in records.prior_carryovers.iter().enumerate() {
        let record = format!("prior_carryovers[{}] ({})", i, entry.category.as_str());
        if entry.origin_year >= year {
            c.issues.push(ValidationIssue::new(
                &record,
                "origin_year",
                entry.origin_year,
                format!("must predate tax year {}", year),
            ));
        }
        c.non_negative(&record, "remaining_amount", entry.remaining_amount);
        if entry.remaining_amount > entry.original_amount {
            c.issues.push(ValidationIssue::new(
                &record,
                "remaining_amount",
                entry.remaining_amount,
                "exceeds original amount",
            ));
        }
    }

    for (field, value) in [
        ("exemption_override", records.amt.exemption_override),
        ("phaseout_start_override", records.amt.phaseout_start_override),
        ("upper_rate_threshold_override", records.amt.upper_rate_threshold_override),
    ] {
        if let Some(value) = value {
            c.non_negative("amt", field, value);
        }
    }

    c.issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilingStatus;
    use crate::tax::property::PropertySaleRecord;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn records() -> ReturnRecords {
        ReturnRecords {
            tax_year: 2025,
            filing_status: FilingStatus::Single,
            ..Default::default()
        }
    }

    fn sale() -> PropertySaleRecord {
        PropertySaleRecord {
            description: "Warehouse".to_string(),
            property_class: PropertyClass::Section1250,
            acquired_date: NaiveDate::from_ymd_opt(2015, 1, 10).unwrap(),
            disposed_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            basis: dec!(500000),
            depreciation_taken: dec!(120000),
            straight_line_depreciation: None,
            proceeds: dec!(650000),
            selling_costs: dec!(30000),
            business_use_pct: dec!(1),
        }
    }

    #[test]
    fn test_clean_records_have_no_issues() {
        let mut r = records();
        r.property_sales.push(sale());
        assert!(validate_records(&r).is_empty());
    }

    #[test]
    fn test_collects_every_issue() {
        let mut bad = sale();
        bad.basis = dec!(-1);
        bad.disposed_date = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap();
        let mut r = records();
        r.property_sales.push(bad);
        r.income.wages = dec!(-50);

        let issues = validate_records(&r);

        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"income.wages"));
        assert!(fields.contains(&"basis"));
        assert!(fields.contains(&"disposed_date"));
        assert!(issues.iter().any(|i| i.record == "property_sales[0] (Warehouse)"));
    }

    #[test]
    fn test_issue_converts_to_invalid_record() {
        let issue = ValidationIssue::new("ira", "taxpayer_age", dec!(-3), "must not be negative");
        let err: EngineError = issue.into();
        assert_eq!(
            err.to_string(),
            "invalid record ira: taxpayer_age: must not be negative (got -3)"
        );
    }

    #[test]
    fn test_insolvency_needs_balance_sheet() {
        use crate::tax::debt_discharge::DebtDischargeCase;
        let mut r = records();
        r.debt_discharge.cases.push(DebtDischargeCase {
            description: "Auto loan".to_string(),
            cod_income: dec!(8000),
            exclusion_type: ExclusionType::Insolvency,
            balance_sheet: None,
            qrpbi: None,
            qualified_property_basis: dec!(0),
            residence_basis: dec!(0),
            elect_basis_first: false,
        });

        let issues = validate_records(&r);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "balance_sheet");
    }

    #[test]
    fn test_prior_carryover_must_predate_year() {
        use crate::tax::{CarryoverCategory, CarryoverEntry};
        let mut r = records();
        let mut overdrawn = CarryoverEntry::new(2023, CarryoverCategory::CapitalLoss, dec!(500), None);
        overdrawn.remaining_amount = dec!(900);
        r.prior_carryovers = vec![
            CarryoverEntry::new(2025, CarryoverCategory::MinimumTaxCredit, dec!(100), None),
            overdrawn,
        ];

        let issues = validate_records(&r);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].field, "origin_year");
        assert_eq!(issues[0].record, "prior_carryovers[0] (MINIMUM_TAX_CREDIT)");
        assert_eq!(issues[1].field, "remaining_amount");
    }
}
