//! Output formatting module for CLI display
//!
//! This module handles all terminal output formatting, separating
//! the concerns of data calculation from presentation.

use crate::config::{ByStatus, FilingStatus, TaxYearConfig};
use crate::db::CalculationRun;
use crate::engine::ConsolidatedBreakdown;
use crate::money::{format_percent, format_usd};
use crate::tax::CarryoverLedger;
use crate::validation::ValidationIssue;
use colored::Colorize;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

/// Pretty JSON for any serializable result
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
}

#[derive(Tabled)]
struct LineRow {
    #[tabled(rename = "Line")]
    line: String,
    #[tabled(rename = "Amount")]
    amount: String,
}

fn line(label: &str, amount: Decimal) -> LineRow {
    LineRow {
        line: label.to_string(),
        amount: format_usd(amount),
    }
}

fn lines_table(rows: Vec<LineRow>) -> String {
    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

fn section(output: &mut String, title: &str, rows: Vec<LineRow>) {
    if rows.is_empty() {
        return;
    }
    output.push_str(&format!("\n{}\n", title.bold()));
    output.push_str(&lines_table(rows));
    output.push('\n');
}

/// Terminal rendering of a calculated return
pub fn format_breakdown_table(breakdown: &ConsolidatedBreakdown) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{} {} Return ({})\n",
        "📊".cyan().bold(),
        breakdown.tax_year,
        breakdown.filing_status.as_str()
    ));

    let deduction_label = if breakdown.standard_deduction_taken {
        "Standard deduction"
    } else {
        "Itemized deductions"
    };
    section(
        &mut output,
        "Income",
        vec![
            line("Total income", breakdown.total_income),
            line("Adjusted gross income", breakdown.adjusted_gross_income),
            line(deduction_label, breakdown.deduction),
            line("Taxable income", breakdown.taxable_income),
        ],
    );

    let property = &breakdown.property;
    let mut form_4797 = Vec::new();
    if property.depreciation_recapture > Decimal::ZERO {
        form_4797.push(line("Depreciation recapture", property.depreciation_recapture));
    }
    if property.lookback_recapture > Decimal::ZERO {
        form_4797.push(line("Section 1231 lookback recapture", property.lookback_recapture));
    }
    if property.section_179_recapture > Decimal::ZERO {
        form_4797.push(line("Section 179 recapture", property.section_179_recapture));
    }
    if property.section_1231_ordinary_loss > Decimal::ZERO {
        form_4797.push(line("Section 1231 ordinary loss", -property.section_1231_ordinary_loss));
    }
    if !form_4797.is_empty() || breakdown.form_4797_section_1231_gain > Decimal::ZERO {
        form_4797.push(line("Ordinary income", breakdown.form_4797_ordinary_income));
        form_4797.push(line("Section 1231 gain (to Schedule D)", breakdown.form_4797_section_1231_gain));
    }
    section(&mut output, "Form 4797 - Sales of Business Property", form_4797);

    let schedule_d = &breakdown.schedule_d;
    let mut schedule_d_rows = Vec::new();
    if schedule_d.net_before_carryover != Decimal::ZERO || schedule_d.carryover_used > Decimal::ZERO {
        schedule_d_rows.push(line("Net short-term", schedule_d.short_term_net));
        schedule_d_rows.push(line("Net long-term", schedule_d.long_term_net));
        if schedule_d.carryover_used > Decimal::ZERO {
            schedule_d_rows.push(line("Capital loss carryover used", schedule_d.carryover_used));
        }
        schedule_d_rows.push(line("Included in income", schedule_d.included_in_income));
        if let Some(entry) = &schedule_d.new_carryover {
            schedule_d_rows.push(line("New capital loss carryover", entry.remaining_amount));
        }
    }
    section(&mut output, "Schedule D - Capital Gains and Losses", schedule_d_rows);

    let ira = &breakdown.ira;
    let mut form_8606 = Vec::new();
    if ira.traditional.denominator > Decimal::ZERO {
        form_8606.push(LineRow {
            line: "Nontaxable percentage".to_string(),
            amount: format_percent(ira.traditional.nontaxable_pct),
        });
        form_8606.push(line("Nontaxable distributions", ira.traditional.nontaxable_distribution));
        form_8606.push(line("Taxable conversions", ira.traditional.taxable_conversion));
        form_8606.push(line("Remaining basis", ira.traditional.remaining_basis));
    }
    if ira.roth.qualified_amount > Decimal::ZERO
        || ira.roth.from_contributions > Decimal::ZERO
        || ira.roth.from_earnings > Decimal::ZERO
    {
        form_8606.push(line("Roth from contributions", ira.roth.from_contributions));
        form_8606.push(line("Roth from conversions", ira.roth.from_conversions));
        form_8606.push(line("Roth taxable earnings", ira.roth.taxable_earnings));
    }
    if !form_8606.is_empty() {
        form_8606.push(line("Taxable distributions", ira.taxable_distributions));
    }
    section(&mut output, "Form 8606 - Nondeductible IRAs", form_8606);

    let discharge = &breakdown.debt_discharge;
    let mut form_982 = Vec::new();
    if discharge.total_cod_income > Decimal::ZERO {
        form_982.push(line("Canceled debt", discharge.total_cod_income));
        form_982.push(line("Excluded", discharge.total_excluded));
        for case in &discharge.cases {
            for reduction in case.reductions.iter().filter(|r| r.reduced_by > Decimal::ZERO) {
                form_982.push(line(
                    &format!("  {} reduced", reduction.attribute.as_str()),
                    reduction.reduced_by,
                ));
            }
        }
        form_982.push(line("Taxable canceled debt", discharge.taxable_cod_income));
    }
    section(&mut output, "Form 982 - Discharge of Indebtedness", form_982);

    let mut tax_rows = vec![
        line("Ordinary tax", breakdown.regular_tax.ordinary_tax),
        line("Preferential tax", breakdown.regular_tax.preferential_tax),
        line("Tax before credits", breakdown.tax_before_credits),
    ];
    let foreign_tax = &breakdown.foreign_tax;
    if foreign_tax.total_foreign_tax_paid > Decimal::ZERO || foreign_tax.carryover_used > Decimal::ZERO {
        if !foreign_tax.simplified_method {
            tax_rows.push(line("Foreign tax limitation", foreign_tax.total_limitation));
        }
        tax_rows.push(line("Foreign tax credit", -breakdown.ftc_credit_allowed));
    }
    tax_rows.push(line("Tax after credits", breakdown.tax_after_credits));
    section(&mut output, "Regular Tax", tax_rows);

    let amt = &breakdown.amt;
    let mut form_6251 = Vec::new();
    if amt.amti > Decimal::ZERO {
        form_6251.push(line("AMTI", amt.amti));
        form_6251.push(line("Exemption", amt.exemption));
        form_6251.push(line("Tentative minimum tax", amt.tentative_minimum_tax));
        if amt.minimum_tax_credit_used > Decimal::ZERO {
            form_6251.push(line("Minimum tax credit used", -amt.minimum_tax_credit_used));
        }
        form_6251.push(line("AMT", amt.amt_liability));
    }
    section(&mut output, "Form 6251 - Alternative Minimum Tax", form_6251);

    let excise = &breakdown.excise;
    let mut form_5329 = Vec::new();
    if excise.early_distribution_tax > Decimal::ZERO {
        form_5329.push(line("Early distributions", excise.early_distribution_tax));
    }
    if excise.excess_contribution_tax > Decimal::ZERO {
        form_5329.push(line("Excess contributions", excise.excess_contribution_tax));
    }
    if excise.rmd_tax > Decimal::ZERO {
        form_5329.push(line("Missed required distributions", excise.rmd_tax));
    }
    section(&mut output, "Form 5329 - Additional Taxes", form_5329);

    output.push_str(&format!("\n{} Summary", "━".repeat(60).bright_black()));
    output.push_str(&format!(
        "\n{:<24} {}",
        "Additional taxes:".bold(),
        format_usd(breakdown.total_additional_tax)
    ));
    output.push_str(&format!(
        "\n{:<24} {}\n",
        "Total tax:".bold(),
        format_usd(breakdown.total_tax).green().bold()
    ));

    output
}

/// Carryover ledger as a table
pub fn format_ledger_table(tax_year: i32, ledger: &CarryoverLedger) -> String {
    if ledger.entries.is_empty() {
        return format!(
            "{} No carryovers stored for {}\nCommit a return first using: {} calculate <file> --commit\n",
            "ℹ".blue().bold(),
            tax_year,
            "fedtax".bold()
        );
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Origin")]
        origin_year: i32,
        #[tabled(rename = "Expires")]
        expires: String,
        #[tabled(rename = "Original")]
        original: String,
        #[tabled(rename = "Remaining")]
        remaining: String,
    }

    let rows: Vec<EntryRow> = ledger
        .entries
        .iter()
        .map(|e| EntryRow {
            category: e.category.as_str().to_string(),
            origin_year: e.origin_year,
            expires: e
                .expires_after_years
                .map(|years| (e.origin_year + years as i32).to_string())
                .unwrap_or_else(|| "never".to_string()),
            original: format_usd(e.original_amount),
            remaining: format_usd(e.remaining_amount),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(3..), Alignment::right());

    format!(
        "\n{} Carryovers available in {}\n\n{}\n{:<20} {}\n",
        "📒".cyan().bold(),
        tax_year,
        table,
        "Total remaining:".bold(),
        format_usd(ledger.total_remaining())
    )
}

/// Committed runs as a table
pub fn format_runs_table(tax_year: i32, runs: &[CalculationRun]) -> String {
    if runs.is_empty() {
        return format!("{} No committed returns for {}\n", "ℹ".blue().bold(), tax_year);
    }

    #[derive(Tabled)]
    struct RunRow {
        #[tabled(rename = "Run")]
        id: String,
        #[tabled(rename = "Status")]
        filing_status: String,
        #[tabled(rename = "Total Tax")]
        total_tax: String,
        #[tabled(rename = "Fingerprint")]
        fingerprint: String,
        #[tabled(rename = "Committed")]
        created_at: String,
    }

    let rows: Vec<RunRow> = runs
        .iter()
        .map(|r| RunRow {
            id: r.id.map(|id| id.to_string()).unwrap_or_default(),
            filing_status: r.filing_status.clone(),
            total_tax: format_usd(r.total_tax),
            fingerprint: r.fingerprint.chars().take(16).collect(),
            created_at: r.created_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(2..3), Alignment::right());
    format!("\n{} Committed {} returns\n\n{}\n", "🗂".cyan().bold(), tax_year, table)
}

/// Validation problems, one row per field
pub fn format_validation_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return format!("{} Records are valid\n", "✓".green().bold());
    }

    #[derive(Tabled)]
    struct IssueRow {
        #[tabled(rename = "Record")]
        record: String,
        #[tabled(rename = "Field")]
        field: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Problem")]
        reason: String,
    }

    let rows: Vec<IssueRow> = issues
        .iter()
        .map(|i| IssueRow {
            record: i.record.clone(),
            field: i.field.clone(),
            value: i.value.clone(),
            reason: i.reason.clone(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    format!(
        "{} {} problem(s) found\n\n{}\n",
        "✗".red().bold(),
        issues.len(),
        table
    )
}

/// Key constants of a tax year
pub fn format_config_table(config: &TaxYearConfig) -> String {
    #[derive(Tabled)]
    struct ConstantRow {
        #[tabled(rename = "Constant")]
        key: String,
        #[tabled(rename = "Single")]
        single: String,
        #[tabled(rename = "Joint")]
        joint: String,
        #[tabled(rename = "Separate")]
        separate: String,
        #[tabled(rename = "Head of Household")]
        head: String,
    }

    fn row(key: &str, table: &ByStatus<Decimal>) -> ConstantRow {
        let cell = |status: FilingStatus| {
            table
                .get(status)
                .map(|v| format_usd(*v))
                .unwrap_or_else(|| "missing".red().to_string())
        };
        ConstantRow {
            key: key.to_string(),
            single: cell(FilingStatus::Single),
            joint: cell(FilingStatus::MarriedFilingJointly),
            separate: cell(FilingStatus::MarriedFilingSeparately),
            head: cell(FilingStatus::HeadOfHousehold),
        }
    }

    let rows = vec![
        row("Standard deduction", &config.income.standard_deduction),
        row("Capital loss limit", &config.income.capital_loss_limit),
        row("0% capital gains top", &config.income.capital_gains.zero_rate_top),
        row("15% capital gains top", &config.income.capital_gains.middle_rate_top),
        row("FTC simplified threshold", &config.foreign_tax.simplified_threshold),
        row("QPRI exclusion limit", &config.debt_discharge.qpri_limit),
        row("AMT exemption", &config.amt.exemption),
        row("AMT phaseout start", &config.amt.phaseout_start),
        row("AMT upper rate threshold", &config.amt.upper_rate_threshold),
    ];

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(1..), Alignment::right());
    format!("\n{} Tax year {} constants\n\n{}\n", "⚙".cyan().bold(), config.tax_year, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::{CarryoverCategory, CarryoverEntry};
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_ledger_message() {
        colored::control::set_override(false);
        let msg = format_ledger_table(2025, &CarryoverLedger::default());
        assert!(msg.contains("No carryovers stored for 2025"));
        assert!(msg.contains("--commit"));
    }

    #[test]
    fn test_ledger_table_shows_expiry() {
        colored::control::set_override(false);
        let ledger = CarryoverLedger::new(vec![CarryoverEntry::new(
            2020,
            CarryoverCategory::ForeignTaxPassive,
            dec!(1000),
            Some(10),
        )]);
        let msg = format_ledger_table(2025, &ledger);
        assert!(msg.contains("FTC_PASSIVE"));
        assert!(msg.contains("2030"));
        assert!(msg.contains("$1,000.00"));
    }

    #[test]
    fn test_no_issues_message() {
        colored::control::set_override(false);
        assert!(format_validation_issues(&[]).contains("valid"));
    }
}
