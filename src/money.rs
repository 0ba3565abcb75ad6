//! Money kernel: rounding, ratios and currency formatting
//!
//! Every amount in the engine is a `rust_decimal::Decimal`. Intermediate
//! values keep full precision; amounts are rounded to the cent only when a
//! module builds its breakdown.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Rounding applied when an amount leaves a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Midpoint rounds away from zero (0.005 -> 0.01)
    #[default]
    HalfUp,
    /// Midpoint rounds to the even neighbour (0.005 -> 0.00)
    Bankers,
}

impl RoundingMode {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::Bankers => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// Round to the cent, half-up.
///
/// # Examples
/// ```
/// use fedtax::money::round_cents;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(round_cents(dec!(2222.2222)), dec!(2222.22));
/// assert_eq!(round_cents(dec!(0.005)), dec!(0.01));
/// ```
pub fn round_cents(amount: Decimal) -> Decimal {
    round_cents_with(amount, RoundingMode::HalfUp)
}

pub fn round_cents_with(amount: Decimal, mode: RoundingMode) -> Decimal {
    amount.round_dp_with_strategy(2, mode.strategy())
}

/// Statutory floor at zero. Not an error condition.
pub fn floor_zero(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO)
}

/// `numerator / denominator` clamped to `[0, 1]`; zero when the denominator
/// is not positive.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (numerator / denominator).clamp(Decimal::ZERO, Decimal::ONE)
}

pub fn apply_rate(amount: Decimal, rate: Decimal) -> Decimal {
    amount * rate
}

/// Currency symbol options for formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySymbol {
    /// Include "$" prefix
    Usd,
    /// No currency symbol (for table cells)
    None,
}

/// Formats a Decimal value using US conventions: `,` thousands separator,
/// `.` decimal separator, sign before the symbol.
///
/// # Examples
/// ```
/// use fedtax::money::{format_usd_with_width, CurrencySymbol};
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_usd_with_width(dec!(1234.56), 0, CurrencySymbol::Usd), "$1,234.56");
/// assert_eq!(format_usd_with_width(dec!(1234), 12, CurrencySymbol::None), "    1,234.00");
/// ```
pub fn format_usd_with_width(value: Decimal, width: usize, symbol: CurrencySymbol) -> String {
    let rounded = round_cents(value);
    let is_negative = rounded < Decimal::ZERO;

    let formatted = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));

    let with_separators: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec![',', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    let prefix = match symbol {
        CurrencySymbol::Usd => "$",
        CurrencySymbol::None => "",
    };

    let result = format!("{}{}{}.{}", sign, prefix, with_separators, decimal_part);

    if width > 0 && result.len() < width {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

/// Format as dollars: "$1,234.56"
///
/// # Examples
/// ```
/// use fedtax::money::format_usd;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_usd(dec!(1234.56)), "$1,234.56");
/// assert_eq!(format_usd(dec!(-500)), "-$500.00");
/// ```
pub fn format_usd(value: Decimal) -> String {
    format_usd_with_width(value, 0, CurrencySymbol::Usd)
}

/// Format a `[0, 1]` ratio as a percentage with two decimals: "22.22%"
pub fn format_percent(value: Decimal) -> String {
    format!("{:.2}%", round_cents(value * Decimal::ONE_HUNDRED))
}
