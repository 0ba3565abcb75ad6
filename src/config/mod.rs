//! Tax-year configuration
//!
//! Every year-specific number the engine uses (brackets, exemptions,
//! thresholds, rates, caps) comes from a `TaxYearConfig`. Values are
//! optional at the type level so that an incomplete file surfaces as
//! `EngineError::ConfigurationMissing` naming the absent key instead of a
//! generic parse failure.

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult, Result};
use crate::money::{round_cents_with, RoundingMode};

const BUILTIN_2024: &str = include_str!("tax_years/2024.toml");
const BUILTIN_2025: &str = include_str!("tax_years/2025.toml");

/// Filing status of the return
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    #[default]
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
    QualifyingSurvivingSpouse,
}

impl FilingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingStatus::Single => "single",
            FilingStatus::MarriedFilingJointly => "married_filing_jointly",
            FilingStatus::MarriedFilingSeparately => "married_filing_separately",
            FilingStatus::HeadOfHousehold => "head_of_household",
            FilingStatus::QualifyingSurvivingSpouse => "qualifying_surviving_spouse",
        }
    }
}

impl FromStr for FilingStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single" | "s" => Ok(FilingStatus::Single),
            "married_filing_jointly" | "mfj" => Ok(FilingStatus::MarriedFilingJointly),
            "married_filing_separately" | "mfs" => Ok(FilingStatus::MarriedFilingSeparately),
            "head_of_household" | "hoh" => Ok(FilingStatus::HeadOfHousehold),
            "qualifying_surviving_spouse" | "qss" => Ok(FilingStatus::QualifyingSurvivingSpouse),
            _ => Err(()),
        }
    }
}

/// One value per filing status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByStatus<T> {
    pub single: Option<T>,
    pub married_filing_jointly: Option<T>,
    pub married_filing_separately: Option<T>,
    pub head_of_household: Option<T>,
    pub qualifying_surviving_spouse: Option<T>,
}

impl<T> Default for ByStatus<T> {
    fn default() -> Self {
        Self {
            single: None,
            married_filing_jointly: None,
            married_filing_separately: None,
            head_of_household: None,
            qualifying_surviving_spouse: None,
        }
    }
}

impl<T> ByStatus<T> {
    pub fn get(&self, status: FilingStatus) -> Option<&T> {
        match status {
            FilingStatus::Single => self.single.as_ref(),
            FilingStatus::MarriedFilingJointly => self.married_filing_jointly.as_ref(),
            FilingStatus::MarriedFilingSeparately => self.married_filing_separately.as_ref(),
            FilingStatus::HeadOfHousehold => self.head_of_household.as_ref(),
            FilingStatus::QualifyingSurvivingSpouse => self.qualifying_surviving_spouse.as_ref(),
        }
    }
}

/// A bracket of a progressive schedule; the last bracket has no upper bound
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bracket {
    pub up_to: Option<Decimal>,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapitalGainsConfig {
    pub zero_rate: Option<Decimal>,
    pub middle_rate: Option<Decimal>,
    pub top_rate: Option<Decimal>,
    #[serde(default)]
    pub zero_rate_top: ByStatus<Decimal>,
    #[serde(default)]
    pub middle_rate_top: ByStatus<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomeConfig {
    #[serde(default)]
    pub standard_deduction: ByStatus<Decimal>,
    #[serde(default)]
    pub capital_loss_limit: ByStatus<Decimal>,
    #[serde(default)]
    pub ordinary_brackets: ByStatus<Vec<Bracket>>,
    #[serde(default)]
    pub capital_gains: CapitalGainsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub long_term_holding_days: Option<i64>,
    pub section_1231_lookback_years: Option<u32>,
    pub section_179_business_use_threshold: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignTaxConfig {
    pub carryforward_years: Option<u32>,
    #[serde(default)]
    pub simplified_threshold: ByStatus<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IraConfig {
    pub penalty_free_age: Option<Decimal>,
    pub roth_holding_years: Option<i32>,
    pub first_home_lifetime_cap: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExciseConfig {
    pub early_distribution_rate: Option<Decimal>,
    pub simple_ira_early_rate: Option<Decimal>,
    pub excess_contribution_rate: Option<Decimal>,
    pub rmd_shortfall_rate: Option<Decimal>,
    pub rmd_corrected_rate: Option<Decimal>,
    pub medical_agi_floor_rate: Option<Decimal>,
    pub separation_from_service_age: Option<Decimal>,
    pub birth_or_adoption_cap: Option<Decimal>,
    pub emergency_expense_cap: Option<Decimal>,
    pub domestic_abuse_cap: Option<Decimal>,
    pub disaster_cap: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebtDischargeConfig {
    /// Dollars of required reduction absorbed by one dollar of credit
    pub credit_reduction_divisor: Option<Decimal>,
    #[serde(default)]
    pub qpri_limit: ByStatus<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmtConfig {
    pub phaseout_rate: Option<Decimal>,
    pub lower_rate: Option<Decimal>,
    pub upper_rate: Option<Decimal>,
    #[serde(default)]
    pub exemption: ByStatus<Decimal>,
    #[serde(default)]
    pub phaseout_start: ByStatus<Decimal>,
    #[serde(default)]
    pub upper_rate_threshold: ByStatus<Decimal>,
}

/// Versioned constants for one tax year
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxYearConfig {
    pub tax_year: i32,
    #[serde(default)]
    pub rounding: RoundingMode,
    #[serde(default)]
    pub income: IncomeConfig,
    #[serde(default)]
    pub property: PropertyConfig,
    #[serde(default)]
    pub foreign_tax: ForeignTaxConfig,
    #[serde(default)]
    pub ira: IraConfig,
    #[serde(default)]
    pub excise: ExciseConfig,
    #[serde(default)]
    pub debt_discharge: DebtDischargeConfig,
    #[serde(default)]
    pub amt: AmtConfig,
}

impl TaxYearConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Parse(e.to_string()))
    }

    /// Shipped constants, when the crate carries a file for `tax_year`
    pub fn builtin(tax_year: i32) -> EngineResult<Self> {
        let contents = match tax_year {
            2024 => BUILTIN_2024,
            2025 => BUILTIN_2025,
            _ => return Err(EngineError::config_missing(tax_year, "tax_year")),
        };
        Self::from_toml_str(contents)
    }

    /// Round an amount leaving a module, using the year's rounding mode
    pub fn round(&self, amount: Decimal) -> Decimal {
        round_cents_with(amount, self.rounding)
    }

    /// Unwrap a scalar constant or report it missing
    pub fn require<T: Copy>(&self, value: Option<T>, key: &str) -> EngineResult<T> {
        value.ok_or_else(|| EngineError::config_missing(self.tax_year, key))
    }

    /// Unwrap a per-status constant or report it missing
    pub fn for_status<T: Clone>(
        &self,
        table: &ByStatus<T>,
        status: FilingStatus,
        key: &str,
    ) -> EngineResult<T> {
        table
            .get(status)
            .cloned()
            .ok_or_else(|| EngineError::config_missing(self.tax_year, format!("{}.{}", key, status.as_str())))
    }

    /// Verify every constant a return with `status` can touch is present.
    ///
    /// Runs before any module so a calculation never stops halfway.
    pub fn check_complete(&self, status: FilingStatus) -> EngineResult<()> {
        let scalars: [(&str, bool); 25] = [
            ("income.capital_gains.zero_rate", self.income.capital_gains.zero_rate.is_some()),
            ("income.capital_gains.middle_rate", self.income.capital_gains.middle_rate.is_some()),
            ("income.capital_gains.top_rate", self.income.capital_gains.top_rate.is_some()),
            ("property.long_term_holding_days", self.property.long_term_holding_days.is_some()),
            ("property.section_1231_lookback_years", self.property.section_1231_lookback_years.is_some()),
            (
                "property.section_179_business_use_threshold",
                self.property.section_179_business_use_threshold.is_some(),
            ),
            ("foreign_tax.carryforward_years", self.foreign_tax.carryforward_years.is_some()),
            ("ira.penalty_free_age", self.ira.penalty_free_age.is_some()),
            ("ira.roth_holding_years", self.ira.roth_holding_years.is_some()),
            ("ira.first_home_lifetime_cap", self.ira.first_home_lifetime_cap.is_some()),
            ("excise.early_distribution_rate", self.excise.early_distribution_rate.is_some()),
            ("excise.simple_ira_early_rate", self.excise.simple_ira_early_rate.is_some()),
            ("excise.excess_contribution_rate", self.excise.excess_contribution_rate.is_some()),
            ("excise.rmd_shortfall_rate", self.excise.rmd_shortfall_rate.is_some()),
            ("excise.rmd_corrected_rate", self.excise.rmd_corrected_rate.is_some()),
            ("excise.medical_agi_floor_rate", self.excise.medical_agi_floor_rate.is_some()),
            ("excise.separation_from_service_age", self.excise.separation_from_service_age.is_some()),
            ("excise.birth_or_adoption_cap", self.excise.birth_or_adoption_cap.is_some()),
            ("excise.emergency_expense_cap", self.excise.emergency_expense_cap.is_some()),
            ("excise.domestic_abuse_cap", self.excise.domestic_abuse_cap.is_some()),
            ("excise.disaster_cap", self.excise.disaster_cap.is_some()),
            ("debt_discharge.credit_reduction_divisor", self.debt_discharge.credit_reduction_divisor.is_some()),
            ("amt.phaseout_rate", self.amt.phaseout_rate.is_some()),
            ("amt.lower_rate", self.amt.lower_rate.is_some()),
            ("amt.upper_rate", self.amt.upper_rate.is_some()),
        ];

        if let Some((key, _)) = scalars.iter().find(|(_, present)| !present) {
            return Err(EngineError::config_missing(self.tax_year, *key));
        }

        self.for_status(&self.income.standard_deduction, status, "income.standard_deduction")?;
        self.for_status(&self.income.capital_loss_limit, status, "income.capital_loss_limit")?;
        self.for_status(&self.income.capital_gains.zero_rate_top, status, "income.capital_gains.zero_rate_top")?;
        self.for_status(
            &self.income.capital_gains.middle_rate_top,
            status,
            "income.capital_gains.middle_rate_top",
        )?;
        self.for_status(&self.foreign_tax.simplified_threshold, status, "foreign_tax.simplified_threshold")?;
        self.for_status(&self.debt_discharge.qpri_limit, status, "debt_discharge.qpri_limit")?;
        self.for_status(&self.amt.exemption, status, "amt.exemption")?;
        self.for_status(&self.amt.phaseout_start, status, "amt.phaseout_start")?;
        self.for_status(&self.amt.upper_rate_threshold, status, "amt.upper_rate_threshold")?;

        let brackets = self.for_status(&self.income.ordinary_brackets, status, "income.ordinary_brackets")?;
        if brackets.is_empty() || brackets.last().and_then(|b| b.up_to).is_some() {
            return Err(EngineError::config_missing(
                self.tax_year,
                format!("income.ordinary_brackets.{} (open top bracket)", status.as_str()),
            ));
        }

        Ok(())
    }
}

/// Directory searched for user-supplied year files
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dir_spec::config_home()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(config_dir.join("fedtax").join("tax_years"))
}

/// Resolve the configuration for `tax_year`.
///
/// Lookup order: explicit path, `<config dir>/fedtax/tax_years/<year>.toml`,
/// then the constants shipped with the crate.
pub fn load_config(tax_year: i32, explicit: Option<&Path>) -> Result<TaxYearConfig> {
    let candidate = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => get_config_dir()
            .ok()
            .map(|dir| dir.join(format!("{}.toml", tax_year)))
            .filter(|path| path.exists()),
    };

    let config = match candidate {
        Some(path) => {
            info!("Loading tax year configuration from {:?}", path);
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            TaxYearConfig::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse config file {:?}", path))?
        }
        None => {
            debug!("Using built-in constants for tax year {}", tax_year);
            TaxYearConfig::builtin(tax_year)?
        }
    };

    if config.tax_year != tax_year {
        return Err(EngineError::config_missing(tax_year, "tax_year").into());
    }

    Ok(config)
}
