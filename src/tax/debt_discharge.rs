//! Cancellation of debt and tax attribute reduction (Form 982)
//!
//! The excluded amount of each case is bounded by its exclusion ceiling, and
//! every excluded dollar must be paid for by reducing tax attributes in
//! statutory order. Credits absorb the required reduction at one dollar of
//! credit per `credit_reduction_divisor` dollars.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{FilingStatus, TaxYearConfig};
use crate::error::{EngineError, EngineResult};
use crate::money::floor_zero;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionType {
    Bankruptcy,
    Insolvency,
    QualifiedFarm,
    /// Qualified real property business indebtedness
    Qrpbi,
    /// Qualified principal residence indebtedness
    Qpri,
    None,
}

impl ExclusionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionType::Bankruptcy => "bankruptcy",
            ExclusionType::Insolvency => "insolvency",
            ExclusionType::QualifiedFarm => "qualified farm",
            ExclusionType::Qrpbi => "QRPBI",
            ExclusionType::Qpri => "QPRI",
            ExclusionType::None => "none",
        }
    }

    fn reduces_attributes(&self) -> bool {
        !matches!(self, ExclusionType::Qpri | ExclusionType::None)
    }
}

/// Tax attributes in statutory reduction order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaxAttribute {
    NetOperatingLoss,
    GeneralBusinessCredit,
    MinimumTaxCredit,
    CapitalLossCarryover,
    PropertyBasis,
    PassiveActivityLoss,
    PassiveActivityCredit,
    ForeignTaxCredit,
}

impl TaxAttribute {
    pub const ORDER: [TaxAttribute; 8] = [
        TaxAttribute::NetOperatingLoss,
        TaxAttribute::GeneralBusinessCredit,
        TaxAttribute::MinimumTaxCredit,
        TaxAttribute::CapitalLossCarryover,
        TaxAttribute::PropertyBasis,
        TaxAttribute::PassiveActivityLoss,
        TaxAttribute::PassiveActivityCredit,
        TaxAttribute::ForeignTaxCredit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxAttribute::NetOperatingLoss => "NOL",
            TaxAttribute::GeneralBusinessCredit => "general business credit",
            TaxAttribute::MinimumTaxCredit => "minimum tax credit",
            TaxAttribute::CapitalLossCarryover => "capital loss carryover",
            TaxAttribute::PropertyBasis => "basis of property",
            TaxAttribute::PassiveActivityLoss => "passive activity loss",
            TaxAttribute::PassiveActivityCredit => "passive activity credit",
            TaxAttribute::ForeignTaxCredit => "foreign tax credit",
        }
    }

    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TaxAttribute::GeneralBusinessCredit
                | TaxAttribute::MinimumTaxCredit
                | TaxAttribute::PassiveActivityCredit
                | TaxAttribute::ForeignTaxCredit
        )
    }
}

/// Attribute balances available for reduction.
///
/// The ledger-backed balances are filled from the carryover ledger when
/// left empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaxAttributes {
    #[serde(default)]
    pub net_operating_loss: Decimal,
    #[serde(default)]
    pub general_business_credit: Decimal,
    #[serde(default)]
    pub minimum_tax_credit: Option<Decimal>,
    #[serde(default)]
    pub capital_loss_carryover: Option<Decimal>,
    #[serde(default)]
    pub property_basis: Decimal,
    /// Part of `property_basis` that is depreciable
    #[serde(default)]
    pub depreciable_basis: Decimal,
    /// Liabilities remaining right after the discharge; basis is not reduced below this
    #[serde(default)]
    pub liabilities_after_discharge: Decimal,
    #[serde(default)]
    pub passive_activity_loss: Decimal,
    #[serde(default)]
    pub passive_activity_credit: Decimal,
    #[serde(default)]
    pub foreign_tax_credit: Option<Decimal>,
}

impl TaxAttributes {
    pub fn balance(&self, attribute: TaxAttribute) -> Decimal {
        match attribute {
            TaxAttribute::NetOperatingLoss => self.net_operating_loss,
            TaxAttribute::GeneralBusinessCredit => self.general_business_credit,
            TaxAttribute::MinimumTaxCredit => self.minimum_tax_credit.unwrap_or_default(),
            TaxAttribute::CapitalLossCarryover => self.capital_loss_carryover.unwrap_or_default(),
            TaxAttribute::PropertyBasis => floor_zero(self.property_basis - self.liabilities_after_discharge),
            TaxAttribute::PassiveActivityLoss => self.passive_activity_loss,
            TaxAttribute::PassiveActivityCredit => self.passive_activity_credit,
            TaxAttribute::ForeignTaxCredit => self.foreign_tax_credit.unwrap_or_default(),
        }
    }

    fn reduce(&mut self, attribute: TaxAttribute, amount: Decimal) {
        match attribute {
            TaxAttribute::NetOperatingLoss => self.net_operating_loss -= amount,
            TaxAttribute::GeneralBusinessCredit => self.general_business_credit -= amount,
            TaxAttribute::MinimumTaxCredit => {
                self.minimum_tax_credit = Some(self.minimum_tax_credit.unwrap_or_default() - amount)
            }
            TaxAttribute::CapitalLossCarryover => {
                self.capital_loss_carryover = Some(self.capital_loss_carryover.unwrap_or_default() - amount)
            }
            TaxAttribute::PropertyBasis => {
                self.property_basis -= amount;
                self.depreciable_basis = self.depreciable_basis.min(self.property_basis);
            }
            TaxAttribute::PassiveActivityLoss => self.passive_activity_loss -= amount,
            TaxAttribute::PassiveActivityCredit => self.passive_activity_credit -= amount,
            TaxAttribute::ForeignTaxCredit => {
                self.foreign_tax_credit = Some(self.foreign_tax_credit.unwrap_or_default() - amount)
            }
        }
    }

    /// Farm ceiling measure: credits count at their reduction rate
    fn adjusted_total(&self, divisor: Decimal) -> Decimal {
        TaxAttribute::ORDER
            .iter()
            .map(|a| {
                let balance = if *a == TaxAttribute::PropertyBasis {
                    self.property_basis
                } else {
                    self.balance(*a)
                };
                if a.is_credit() {
                    balance * divisor
                } else {
                    balance
                }
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BalanceSheet {
    pub total_liabilities: Decimal,
    pub total_assets_fmv: Decimal,
}

impl BalanceSheet {
    pub fn insolvency(&self) -> Decimal {
        floor_zero(self.total_liabilities - self.total_assets_fmv)
    }
}

/// Facts bounding a QRPBI exclusion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QrpbiFacts {
    pub outstanding_principal: Decimal,
    pub property_fmv: Decimal,
    pub depreciable_real_property_basis: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtDischargeCase {
    pub description: String,
    pub cod_income: Decimal,
    pub exclusion_type: ExclusionType,
    #[serde(default)]
    pub balance_sheet: Option<BalanceSheet>,
    #[serde(default)]
    pub qrpbi: Option<QrpbiFacts>,
    /// Basis of qualified farm property
    #[serde(default)]
    pub qualified_property_basis: Decimal,
    #[serde(default)]
    pub residence_basis: Decimal,
    /// §108(b)(5): reduce depreciable basis before the other attributes
    #[serde(default)]
    pub elect_basis_first: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebtDischargeRecords {
    #[serde(default)]
    pub cases: Vec<DebtDischargeCase>,
    #[serde(default)]
    pub attributes: TaxAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeReduction {
    pub attribute: TaxAttribute,
    /// Dollars of the attribute eliminated
    pub reduced_by: Decimal,
    /// Dollars of required reduction absorbed
    pub absorbed: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub description: String,
    pub exclusion_type: ExclusionType,
    pub cod_income: Decimal,
    pub exclusion_ceiling: Option<Decimal>,
    pub excluded: Decimal,
    pub taxable: Decimal,
    pub reductions: Vec<AttributeReduction>,
    /// Excluded amount left after every attribute is exhausted
    pub unabsorbed: Decimal,
    pub residence_basis_reduction: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebtDischargeBreakdown {
    pub cases: Vec<CaseResult>,
    pub total_cod_income: Decimal,
    pub total_excluded: Decimal,
    pub taxable_cod_income: Decimal,
    pub remaining_attributes: TaxAttributes,
}

impl DebtDischargeBreakdown {
    /// Total reduction of one attribute across all cases
    pub fn reduction_of(&self, attribute: TaxAttribute) -> Decimal {
        self.cases
            .iter()
            .flat_map(|c| c.reductions.iter())
            .filter(|r| r.attribute == attribute)
            .map(|r| r.reduced_by)
            .sum()
    }
}

fn exclusion_ceiling(
    case: &DebtDischargeCase,
    attributes: &TaxAttributes,
    divisor: Decimal,
    qpri_limit: Decimal,
) -> EngineResult<Option<Decimal>> {
    let missing = |field: &str| EngineError::InvalidRecord {
        record: format!("debt discharge ({})", case.description),
        field: field.to_string(),
        reason: format!("required for {} exclusion", case.exclusion_type.as_str()),
    };

    Ok(match case.exclusion_type {
        ExclusionType::Bankruptcy => None,
        ExclusionType::Insolvency => Some(
            case.balance_sheet
                .ok_or_else(|| missing("balance_sheet"))?
                .insolvency(),
        ),
        ExclusionType::QualifiedFarm => {
            Some(attributes.adjusted_total(divisor) + floor_zero(case.qualified_property_basis))
        }
        ExclusionType::Qrpbi => {
            let facts = case.qrpbi.ok_or_else(|| missing("qrpbi"))?;
            Some(
                floor_zero(facts.outstanding_principal - facts.property_fmv)
                    .min(floor_zero(facts.depreciable_real_property_basis)),
            )
        }
        ExclusionType::Qpri => Some(qpri_limit),
        ExclusionType::None => Some(Decimal::ZERO),
    })
}

/// Walk the attributes in order until `required` is absorbed
fn reduce_attributes(
    required: Decimal,
    attributes: &mut TaxAttributes,
    elect_basis_first: bool,
    divisor: Decimal,
) -> (Vec<AttributeReduction>, Decimal) {
    let mut reductions = Vec::new();
    let mut remaining = required;

    if elect_basis_first && remaining > Decimal::ZERO {
        let available = attributes
            .depreciable_basis
            .min(attributes.balance(TaxAttribute::PropertyBasis));
        let reduced_by = remaining.min(floor_zero(available));
        if reduced_by > Decimal::ZERO {
            attributes.reduce(TaxAttribute::PropertyBasis, reduced_by);
            remaining -= reduced_by;
            reductions.push(AttributeReduction {
                attribute: TaxAttribute::PropertyBasis,
                reduced_by,
                absorbed: reduced_by,
            });
        }
    }

    for attribute in TaxAttribute::ORDER {
        if remaining <= Decimal::ZERO {
            break;
        }
        let balance = floor_zero(attributes.balance(attribute));
        if balance <= Decimal::ZERO {
            continue;
        }

        let (reduced_by, absorbed) = if attribute.is_credit() {
            if balance * divisor >= remaining {
                (remaining / divisor, remaining)
            } else {
                (balance, balance * divisor)
            }
        } else {
            let reduced_by = balance.min(remaining);
            (reduced_by, reduced_by)
        };

        attributes.reduce(attribute, reduced_by);
        remaining -= absorbed;
        reductions.push(AttributeReduction {
            attribute,
            reduced_by,
            absorbed,
        });
    }

    (reductions, remaining)
}

pub fn calculate(
    records: &DebtDischargeRecords,
    status: FilingStatus,
    config: &TaxYearConfig,
) -> EngineResult<DebtDischargeBreakdown> {
    let divisor = config.require(
        config.debt_discharge.credit_reduction_divisor,
        "debt_discharge.credit_reduction_divisor",
    )?;
    let qpri_limit = config.for_status(&config.debt_discharge.qpri_limit, status, "debt_discharge.qpri_limit")?;

    let mut attributes = records.attributes.clone();
    let mut breakdown = DebtDischargeBreakdown::default();

    for case in &records.cases {
        let cod_income = floor_zero(case.cod_income);
        let ceiling = exclusion_ceiling(case, &attributes, divisor, qpri_limit)?;
        let excluded = match ceiling {
            Some(ceiling) => cod_income.min(floor_zero(ceiling)),
            None => cod_income,
        };
        let taxable = cod_income - excluded;

        let (reductions, unabsorbed) = if case.exclusion_type.reduces_attributes() {
            reduce_attributes(excluded, &mut attributes, case.elect_basis_first, divisor)
        } else {
            (Vec::new(), Decimal::ZERO)
        };

        let residence_basis_reduction = if case.exclusion_type == ExclusionType::Qpri {
            excluded.min(floor_zero(case.residence_basis))
        } else {
            Decimal::ZERO
        };

        debug!(
            "982 {} ({}): COD {} excluded {} taxable {}",
            case.description,
            case.exclusion_type.as_str(),
            cod_income,
            excluded,
            taxable
        );

        breakdown.total_cod_income += config.round(cod_income);
        breakdown.total_excluded += config.round(excluded);
        breakdown.taxable_cod_income += config.round(taxable);
        breakdown.cases.push(CaseResult {
            description: case.description.clone(),
            exclusion_type: case.exclusion_type,
            cod_income: config.round(cod_income),
            exclusion_ceiling: ceiling.map(|c| config.round(c)),
            excluded: config.round(excluded),
            taxable: config.round(taxable),
            reductions: round_reductions(reductions, config),
            unabsorbed: config.round(unabsorbed),
            residence_basis_reduction: config.round(residence_basis_reduction),
        });
    }

    breakdown.remaining_attributes = attributes;
    Ok(breakdown)
}

/// Walk the attributes again with balances known only once the year's own
/// credits have been used. Exclusions and taxable amounts stay as determined.
pub fn reduce_after_use(
    determined: &DebtDischargeBreakdown,
    records: &DebtDischargeRecords,
    config: &TaxYearConfig,
) -> EngineResult<DebtDischargeBreakdown> {
    let divisor = config.require(
        config.debt_discharge.credit_reduction_divisor,
        "debt_discharge.credit_reduction_divisor",
    )?;

    let mut attributes = records.attributes.clone();
    let mut breakdown = determined.clone();
    for (result, case) in breakdown.cases.iter_mut().zip(&records.cases) {
        let (reductions, unabsorbed) = if case.exclusion_type.reduces_attributes() {
            reduce_attributes(result.excluded, &mut attributes, case.elect_basis_first, divisor)
        } else {
            (Vec::new(), Decimal::ZERO)
        };
        result.reductions = round_reductions(reductions, config);
        result.unabsorbed = config.round(unabsorbed);
    }

    breakdown.remaining_attributes = attributes;
    Ok(breakdown)
}

fn round_reductions(reductions: Vec<AttributeReduction>, config: &TaxYearConfig) -> Vec<AttributeReduction> {
    reductions
        .into_iter()
        .map(|r| AttributeReduction {
            attribute: r.attribute,
            reduced_by: config.round(r.reduced_by),
            absorbed: config.round(r.absorbed),
        })
        .collect()
}
