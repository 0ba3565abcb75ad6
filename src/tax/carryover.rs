//! Multi-year carryover ledger
//!
//! One primitive backs every carried attribute: foreign tax credits,
//! capital losses, §1231 lookback losses, minimum tax credit and IRA basis.
//! Entries are consumed oldest-first within a category; an entry past its
//! expiration window is skipped but left in place.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a carried amount represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CarryoverCategory {
    ForeignTaxPassive,
    ForeignTaxGeneral,
    CapitalLoss,
    Section1231Loss,
    MinimumTaxCredit,
    TraditionalIraBasis,
    RothContributionBasis,
}

impl CarryoverCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarryoverCategory::ForeignTaxPassive => "FTC_PASSIVE",
            CarryoverCategory::ForeignTaxGeneral => "FTC_GENERAL",
            CarryoverCategory::CapitalLoss => "CAPITAL_LOSS",
            CarryoverCategory::Section1231Loss => "SECTION_1231_LOSS",
            CarryoverCategory::MinimumTaxCredit => "MINIMUM_TAX_CREDIT",
            CarryoverCategory::TraditionalIraBasis => "TRADITIONAL_IRA_BASIS",
            CarryoverCategory::RothContributionBasis => "ROTH_CONTRIBUTION_BASIS",
        }
    }

    pub fn kind(&self) -> CarryoverKind {
        match self {
            CarryoverCategory::ForeignTaxPassive
            | CarryoverCategory::ForeignTaxGeneral
            | CarryoverCategory::MinimumTaxCredit => CarryoverKind::Credit,
            CarryoverCategory::CapitalLoss | CarryoverCategory::Section1231Loss => {
                CarryoverKind::Loss
            }
            CarryoverCategory::TraditionalIraBasis | CarryoverCategory::RothContributionBasis => {
                CarryoverKind::Basis
            }
        }
    }
}

impl FromStr for CarryoverCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FTC_PASSIVE" => Ok(CarryoverCategory::ForeignTaxPassive),
            "FTC_GENERAL" => Ok(CarryoverCategory::ForeignTaxGeneral),
            "CAPITAL_LOSS" => Ok(CarryoverCategory::CapitalLoss),
            "SECTION_1231_LOSS" => Ok(CarryoverCategory::Section1231Loss),
            "MINIMUM_TAX_CREDIT" => Ok(CarryoverCategory::MinimumTaxCredit),
            "TRADITIONAL_IRA_BASIS" => Ok(CarryoverCategory::TraditionalIraBasis),
            "ROTH_CONTRIBUTION_BASIS" => Ok(CarryoverCategory::RothContributionBasis),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CarryoverKind {
    Loss,
    Credit,
    Basis,
}

impl CarryoverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarryoverKind::Loss => "LOSS",
            CarryoverKind::Credit => "CREDIT",
            CarryoverKind::Basis => "BASIS",
        }
    }
}

impl FromStr for CarryoverKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOSS" => Ok(CarryoverKind::Loss),
            "CREDIT" => Ok(CarryoverKind::Credit),
            "BASIS" => Ok(CarryoverKind::Basis),
            _ => Err(()),
        }
    }
}

/// One year's carried amount in a category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarryoverEntry {
    pub origin_year: i32,
    pub category: CarryoverCategory,
    pub kind: CarryoverKind,
    pub original_amount: Decimal,
    pub remaining_amount: Decimal,
    /// `None` carries indefinitely
    pub expires_after_years: Option<u32>,
}

impl CarryoverEntry {
    pub fn new(
        origin_year: i32,
        category: CarryoverCategory,
        amount: Decimal,
        expires_after_years: Option<u32>,
    ) -> Self {
        Self {
            origin_year,
            category,
            kind: category.kind(),
            original_amount: amount,
            remaining_amount: amount,
            expires_after_years,
        }
    }

    /// Inclusive window: usable in `tax_year` while
    /// `tax_year - origin_year <= expires_after_years`.
    pub fn is_available_in(&self, tax_year: i32) -> bool {
        if tax_year < self.origin_year {
            return false;
        }
        match self.expires_after_years {
            Some(years) => i64::from(tax_year) - i64::from(self.origin_year) <= i64::from(years),
            None => true,
        }
    }

    pub fn amount_used(&self) -> Decimal {
        self.original_amount - self.remaining_amount
    }
}

/// A single draw against one entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarryoverDraw {
    pub origin_year: i32,
    pub amount: Decimal,
}

/// Outcome of a `consume` call
#[derive(Debug, Clone, PartialEq)]
pub struct Consumption {
    /// At most the amount requested
    pub amount_used: Decimal,
    /// Every input entry, in input order, with new remaining balances
    pub updated_entries: Vec<CarryoverEntry>,
    /// Draws in consumption order (oldest first)
    pub draws: Vec<CarryoverDraw>,
}

/// Consume up to `amount_needed` from `category`, oldest origin year first.
///
/// Entries outside their window for `tax_year` are skipped. Running short is
/// not an error; the caller simply receives less than it asked for.
pub fn consume(
    entries: &[CarryoverEntry],
    category: CarryoverCategory,
    amount_needed: Decimal,
    tax_year: i32,
) -> Consumption {
    let mut updated_entries = entries.to_vec();
    let mut draws = Vec::new();
    let mut amount_used = Decimal::ZERO;

    if amount_needed <= Decimal::ZERO {
        return Consumption {
            amount_used,
            updated_entries,
            draws,
        };
    }

    // Stable sort on indices keeps same-year entries in input order
    let mut order: Vec<usize> = (0..updated_entries.len())
        .filter(|&i| {
            let entry = &updated_entries[i];
            entry.category == category
                && entry.remaining_amount > Decimal::ZERO
                && entry.is_available_in(tax_year)
        })
        .collect();
    order.sort_by_key(|&i| updated_entries[i].origin_year);

    let mut still_needed = amount_needed;
    for i in order {
        if still_needed <= Decimal::ZERO {
            break;
        }

        let entry = &mut updated_entries[i];
        let draw = still_needed.min(entry.remaining_amount);
        entry.remaining_amount -= draw;
        still_needed -= draw;
        amount_used += draw;
        draws.push(CarryoverDraw {
            origin_year: entry.origin_year,
            amount: draw,
        });
    }

    Consumption {
        amount_used,
        updated_entries,
        draws,
    }
}

/// The carryover state of one taxpayer at the start of a tax year
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CarryoverLedger {
    pub entries: Vec<CarryoverEntry>,
}

impl CarryoverLedger {
    pub fn new(entries: Vec<CarryoverEntry>) -> Self {
        Self { entries }
    }

    /// Entries of one category, in ledger order
    pub fn entries_for(&self, category: CarryoverCategory) -> Vec<CarryoverEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    /// Remaining amount usable in `tax_year`
    pub fn available(&self, category: CarryoverCategory, tax_year: i32) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.category == category && e.is_available_in(tax_year))
            .map(|e| e.remaining_amount)
            .sum()
    }

    /// Swap in a module's updated entries for one category
    pub fn replace_category(&mut self, category: CarryoverCategory, entries: Vec<CarryoverEntry>) {
        self.entries.retain(|e| e.category != category);
        self.entries
            .extend(entries.into_iter().filter(|e| e.category == category));
    }

    pub fn push(&mut self, entry: CarryoverEntry) {
        if entry.remaining_amount > Decimal::ZERO {
            self.entries.push(entry);
        }
    }

    /// Ledger carried into `next_year`: exhausted and expired entries dropped,
    /// ordered by category then origin year.
    pub fn roll_forward(&self, next_year: i32) -> CarryoverLedger {
        let mut entries: Vec<CarryoverEntry> = self
            .entries
            .iter()
            .filter(|e| e.remaining_amount > Decimal::ZERO && e.is_available_in(next_year))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.category, e.origin_year));
        CarryoverLedger { entries }
    }

    pub fn total_original(&self) -> Decimal {
        self.entries.iter().map(|e| e.original_amount).sum()
    }

    pub fn total_remaining(&self) -> Decimal {
        self.entries.iter().map(|e| e.remaining_amount).sum()
    }
}
