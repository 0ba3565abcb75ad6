//! Whole-return calculations through the public engine entry point

use chrono::NaiveDate;
use fedtax::config::{FilingStatus, TaxYearConfig};
use fedtax::engine::{calculate_return, IncomeFacts, ReturnRecords};
use fedtax::money::{round_cents, round_cents_with, RoundingMode};
use fedtax::tax::amt::{phased_exemption, AmtAdjustment, AmtAdjustmentKind};
use fedtax::tax::debt_discharge::{DebtDischargeCase, ExclusionType, TaxAttribute};
use fedtax::tax::excise::EarlyDistribution;
use fedtax::tax::foreign_tax::{CountryTax, ForeignIncomeRecord, ForeignTaxCategory};
use fedtax::tax::ira::IraProfile;
use fedtax::tax::property::{PropertyClass, PropertySaleRecord};
use fedtax::tax::{consume, CarryoverCategory, CarryoverEntry, CarryoverLedger};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn config(year: i32) -> TaxYearConfig {
    TaxYearConfig::builtin(year).unwrap()
}

fn single(tax_year: i32, income: IncomeFacts) -> ReturnRecords {
    ReturnRecords {
        tax_year,
        filing_status: FilingStatus::Single,
        income,
        ..Default::default()
    }
}

fn land_sale(description: &str, basis: Decimal, proceeds: Decimal) -> PropertySaleRecord {
    PropertySaleRecord {
        description: description.to_string(),
        property_class: PropertyClass::Section1231Other,
        acquired_date: NaiveDate::from_ymd_opt(2018, 3, 1).unwrap(),
        disposed_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        basis,
        depreciation_taken: dec!(0),
        straight_line_depreciation: None,
        proceeds,
        selling_costs: dec!(0),
        business_use_pct: dec!(1),
    }
}

#[test]
fn section_1231_netting_with_lookback() {
    let mut records = single(2025, IncomeFacts::default());
    records.property_sales = vec![
        land_sale("Parcel A", dec!(100000), dec!(150000)),
        land_sale("Parcel B", dec!(100000), dec!(80000)),
    ];
    let prior = CarryoverLedger::new(vec![CarryoverEntry::new(
        2023,
        CarryoverCategory::Section1231Loss,
        dec!(10000),
        Some(5),
    )]);

    let result = calculate_return(&records, &prior, &config(2025)).unwrap();

    assert_eq!(result.property.net_section_1231, dec!(30000));
    assert_eq!(result.property.lookback_recapture, dec!(10000));
    assert_eq!(result.form_4797_ordinary_income, dec!(10000));
    assert_eq!(result.form_4797_section_1231_gain, dec!(20000));
    assert_eq!(result.schedule_d.net_capital_gain, dec!(20000));
    assert_eq!(result.adjusted_gross_income, dec!(30000));
    // The recaptured loss is used up
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::Section1231Loss, 2026),
        dec!(0)
    );
}

#[test]
fn foreign_tax_limitation_carries_excess() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(90750),
            taxable_interest: dec!(25000),
            ..Default::default()
        },
    );
    records.foreign_income = vec![ForeignIncomeRecord {
        category: ForeignTaxCategory::Passive,
        gross_foreign_income: dec!(25000),
        allocated_deductions: dec!(0),
        country_taxes: vec![CountryTax {
            country: "DE".to_string(),
            tax_paid: dec!(6000),
        }],
    }];

    let result = calculate_return(&records, &CarryoverLedger::default(), &config(2025)).unwrap();

    assert_eq!(result.taxable_income, dec!(100000));
    assert_eq!(result.tax_before_credits, dec!(16914.00));
    // 16914 x 25000 / 100000
    assert_eq!(result.foreign_tax.total_limitation, dec!(4228.50));
    assert_eq!(result.ftc_credit_allowed, dec!(4228.50));
    assert_eq!(result.tax_after_credits, dec!(12685.50));
    assert_eq!(result.amt_liability, dec!(0));
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::ForeignTaxPassive, 2026),
        dec!(1771.50)
    );
    let entry = &result.next_year_carryovers.entries_for(CarryoverCategory::ForeignTaxPassive)[0];
    assert_eq!(entry.origin_year, 2025);
    assert_eq!(entry.expires_after_years, Some(10));
}

#[test]
fn foreign_tax_module_example() {
    let records = vec![ForeignIncomeRecord {
        category: ForeignTaxCategory::Passive,
        gross_foreign_income: dec!(25000),
        allocated_deductions: dec!(0),
        country_taxes: vec![CountryTax {
            country: "FR".to_string(),
            tax_paid: dec!(6000),
        }],
    }];

    let result = fedtax::tax::foreign_tax::calculate(
        &records,
        &[],
        dec!(100000),
        dec!(20000),
        FilingStatus::Single,
        &config(2025),
    )
    .unwrap();

    assert!(!result.simplified_method);
    assert_eq!(result.total_limitation, dec!(5000));
    assert_eq!(result.credit_allowed, dec!(5000));
    assert_eq!(result.new_carryforward, dec!(1000));
}

#[test]
fn pro_rata_ira_distribution() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(40000),
            ..Default::default()
        },
    );
    records.ira = Some(IraProfile {
        taxpayer_age: dec!(62),
        prior_year_basis: Some(dec!(20000)),
        year_end_value: dec!(80000),
        traditional_distributions: dec!(10000),
        ..Default::default()
    });

    let result = calculate_return(&records, &CarryoverLedger::default(), &config(2025)).unwrap();

    let traditional = &result.ira.traditional;
    assert_eq!(traditional.denominator, dec!(90000));
    assert_eq!(traditional.nontaxable_distribution, dec!(2222.22));
    assert_eq!(traditional.taxable_distribution, dec!(7777.78));
    assert_eq!(result.ira_taxable_distributions, dec!(7777.78));
    assert_eq!(result.adjusted_gross_income, dec!(47777.78));
    // Over the penalty-free age: no additional tax
    assert_eq!(result.excise_taxes, dec!(0));
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::TraditionalIraBasis, 2026),
        dec!(17777.78)
    );
}

#[test]
fn early_ira_distribution_adds_penalty() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(60000),
            ..Default::default()
        },
    );
    records.ira = Some(IraProfile {
        taxpayer_age: dec!(40),
        year_end_value: dec!(50000),
        traditional_distributions: dec!(10000),
        ..Default::default()
    });

    let result = calculate_return(&records, &CarryoverLedger::default(), &config(2025)).unwrap();

    assert_eq!(result.ira_taxable_distributions, dec!(10000));
    assert_eq!(result.excise.early_distribution_tax, dec!(1000.00));
    assert_eq!(result.total_additional_tax, dec!(1000.00));
    assert_eq!(result.total_tax, result.tax_after_credits + dec!(1000.00));
}

#[test]
fn early_distribution_waived_at_penalty_free_age() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(30000),
            other_income: dec!(10000),
            ..Default::default()
        },
    );
    records.taxpayer_age = Some(dec!(66));
    records.early_distributions = vec![EarlyDistribution {
        description: "Old 401(k)".to_string(),
        gross_amount: dec!(10000),
        taxable_amount: dec!(10000),
        exception: None,
        simple_ira_first_two_years: false,
    }];

    let result = calculate_return(&records, &CarryoverLedger::default(), &config(2025)).unwrap();

    assert_eq!(result.excise.early_distributions[0].exception_amount, dec!(10000));
    assert_eq!(result.excise.early_distribution_tax, dec!(0));
    assert_eq!(result.total_additional_tax, dec!(0));
}

#[test]
fn credit_used_this_year_is_not_reduced_by_debt_discharge() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(90750),
            taxable_interest: dec!(25000),
            ..Default::default()
        },
    );
    records.foreign_income = vec![ForeignIncomeRecord {
        category: ForeignTaxCategory::Passive,
        gross_foreign_income: dec!(25000),
        allocated_deductions: dec!(0),
        country_taxes: vec![CountryTax {
            country: "NL".to_string(),
            tax_paid: dec!(1000),
        }],
    }];
    records.debt_discharge.cases = vec![DebtDischargeCase {
        description: "Chapter 7 discharge".to_string(),
        cod_income: dec!(3000),
        exclusion_type: ExclusionType::Bankruptcy,
        balance_sheet: None,
        qrpbi: None,
        qualified_property_basis: dec!(0),
        residence_basis: dec!(0),
        elect_basis_first: false,
    }];
    let prior = CarryoverLedger::new(vec![CarryoverEntry::new(
        2020,
        CarryoverCategory::ForeignTaxPassive,
        dec!(1000),
        Some(10),
    )]);

    let result = calculate_return(&records, &prior, &config(2025)).unwrap();

    // The limitation of 4228.50 leaves room for the whole carryover
    assert_eq!(result.foreign_tax.carryover_used, dec!(1000));
    assert_eq!(result.ftc_credit_allowed, dec!(2000));
    assert_eq!(result.taxable_cod_income, dec!(0));

    // Nothing is left to carry, so nothing absorbs the excluded amount
    let discharge = &result.debt_discharge;
    assert_eq!(discharge.reduction_of(TaxAttribute::ForeignTaxCredit), dec!(0));
    assert_eq!(discharge.cases[0].unabsorbed, dec!(3000));
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::ForeignTaxPassive, 2026),
        dec!(0)
    );
}

#[test]
fn debt_discharge_reduces_credit_left_after_use() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(90750),
            taxable_interest: dec!(25000),
            ..Default::default()
        },
    );
    records.foreign_income = vec![ForeignIncomeRecord {
        category: ForeignTaxCategory::Passive,
        gross_foreign_income: dec!(25000),
        allocated_deductions: dec!(0),
        country_taxes: vec![CountryTax {
            country: "NL".to_string(),
            tax_paid: dec!(4000),
        }],
    }];
    records.debt_discharge.cases = vec![DebtDischargeCase {
        description: "Chapter 7 discharge".to_string(),
        cod_income: dec!(1500),
        exclusion_type: ExclusionType::Bankruptcy,
        balance_sheet: None,
        qrpbi: None,
        qualified_property_basis: dec!(0),
        residence_basis: dec!(0),
        elect_basis_first: false,
    }];
    let prior = CarryoverLedger::new(vec![CarryoverEntry::new(
        2020,
        CarryoverCategory::ForeignTaxPassive,
        dec!(1000),
        Some(10),
    )]);

    let result = calculate_return(&records, &prior, &config(2025)).unwrap();

    // 228.50 of the carryover is used, 771.50 is carried and then reduced by 500
    assert_eq!(result.foreign_tax.carryover_used, dec!(228.50));
    assert_eq!(result.debt_discharge.reduction_of(TaxAttribute::ForeignTaxCredit), dec!(500));
    assert_eq!(result.debt_discharge.cases[0].unabsorbed, dec!(0));
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::ForeignTaxPassive, 2026),
        dec!(271.50)
    );
}

#[test]
fn amt_exemption_phaseout() {
    let (reduction, exemption) = phased_exemption(dec!(700000), dec!(88100), dec!(626350), dec!(0.25));
    assert_eq!(reduction, dec!(18412.50));
    assert_eq!(exemption, dec!(69687.50));

    // Never negative
    let (_, exemption) = phased_exemption(dec!(2000000), dec!(88100), dec!(626350), dec!(0.25));
    assert_eq!(exemption, dec!(0));
}

#[test]
fn incentive_stock_options_trigger_amt_and_credit() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(215750),
            ..Default::default()
        },
    );
    records.amt.adjustments = vec![AmtAdjustment {
        kind: AmtAdjustmentKind::IncentiveStockOptions,
        amount: dec!(200000),
    }];

    let result = calculate_return(&records, &CarryoverLedger::default(), &config(2025)).unwrap();

    assert_eq!(result.taxable_income, dec!(200000));
    assert_eq!(result.tax_before_credits, dec!(41063.00));
    assert_eq!(result.amt.amti, dec!(415750));
    assert_eq!(result.amt.exemption, dec!(88100));
    // 239100 x 26% + 88550 x 28%
    assert_eq!(result.amt.tentative_minimum_tax, dec!(86960.00));
    assert_eq!(result.amt_liability, dec!(45897.00));
    assert_eq!(result.total_tax, dec!(86960.00));
    // Deferral item: the whole AMT becomes a credit
    assert_eq!(
        result.next_year_carryovers.available(CarryoverCategory::MinimumTaxCredit, 2026),
        dec!(45897.00)
    );
}

#[test]
fn capital_loss_carries_across_years() {
    let year_one = single(
        2024,
        IncomeFacts {
            wages: dec!(50000),
            long_term_capital_gain: dec!(-10000),
            ..Default::default()
        },
    );
    let first = calculate_return(&year_one, &CarryoverLedger::default(), &config(2024)).unwrap();
    assert_eq!(first.schedule_d.capital_loss_deduction, dec!(3000));
    assert_eq!(first.adjusted_gross_income, dec!(47000));
    assert_eq!(
        first.next_year_carryovers.available(CarryoverCategory::CapitalLoss, 2025),
        dec!(7000)
    );

    let year_two = single(
        2025,
        IncomeFacts {
            wages: dec!(50000),
            long_term_capital_gain: dec!(2000),
            ..Default::default()
        },
    );
    let second = calculate_return(&year_two, &first.next_year_carryovers, &config(2025)).unwrap();

    assert_eq!(second.schedule_d.carryover_used, dec!(5000));
    assert_eq!(second.schedule_d.capital_loss_deduction, dec!(3000));
    assert_eq!(second.adjusted_gross_income, dec!(47000));
    assert_eq!(
        second.next_year_carryovers.available(CarryoverCategory::CapitalLoss, 2026),
        dec!(2000)
    );
}

#[test]
fn same_inputs_give_identical_output() {
    let mut records = single(
        2025,
        IncomeFacts {
            wages: dec!(120000),
            qualified_dividends: dec!(4000),
            ordinary_dividends: dec!(4000),
            ..Default::default()
        },
    );
    records.property_sales = vec![land_sale("Lot", dec!(40000), dec!(65000))];
    records.ira = Some(IraProfile {
        taxpayer_age: dec!(45),
        nondeductible_contributions: dec!(7000),
        year_end_value: dec!(30000),
        roth_conversions: dec!(7000),
        ..Default::default()
    });
    let prior = CarryoverLedger::new(vec![
        CarryoverEntry::new(2022, CarryoverCategory::CapitalLoss, dec!(1500), None),
        CarryoverEntry::new(2020, CarryoverCategory::MinimumTaxCredit, dec!(800), None),
    ]);

    let first = calculate_return(&records, &prior, &config(2025)).unwrap();
    let second = calculate_return(&records, &prior, &config(2025)).unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
}

#[test]
fn rounding_is_idempotent() {
    let samples = [
        dec!(0.005),
        dec!(-0.005),
        dec!(1234.5678),
        dec!(2222.2222222),
        dec!(99.995),
        dec!(7777.775),
        dec!(0),
    ];
    for amount in samples {
        let once = round_cents(amount);
        assert_eq!(round_cents(once), once, "{}", amount);

        let bankers = round_cents_with(amount, RoundingMode::Bankers);
        assert_eq!(round_cents_with(bankers, RoundingMode::Bankers), bankers, "{}", amount);
    }
}

#[test]
fn consumption_conserves_amounts() {
    let mut entries = vec![
        CarryoverEntry::new(2016, CarryoverCategory::ForeignTaxGeneral, dec!(400), Some(10)),
        CarryoverEntry::new(2019, CarryoverCategory::ForeignTaxGeneral, dec!(1200), Some(10)),
        CarryoverEntry::new(2023, CarryoverCategory::ForeignTaxGeneral, dec!(750.55), Some(10)),
    ];
    let original: Decimal = entries.iter().map(|e| e.original_amount).sum();
    let mut used_total = Decimal::ZERO;

    for (year, request) in [(2025, dec!(300)), (2026, dec!(1000)), (2027, dec!(5000))] {
        let consumption = consume(&entries, CarryoverCategory::ForeignTaxGeneral, request, year);
        used_total += consumption.amount_used;
        entries = consumption.updated_entries;

        let remaining: Decimal = entries.iter().map(|e| e.remaining_amount).sum();
        let used: Decimal = entries.iter().map(|e| e.amount_used()).sum();
        assert_eq!(original, remaining + used);
        assert_eq!(used, used_total);
    }

    // The 2016 entry was usable through 2026 only
    assert_eq!(entries[0].remaining_amount, dec!(0));
    assert!(entries.iter().all(|e| e.remaining_amount >= Decimal::ZERO));
}
