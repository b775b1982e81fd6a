use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Renders an amount as `$1,234.50`: two decimals, comma thousands separators.
pub fn format_currency(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let fixed = format!("{:.2}", rounded.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    format!("{sign}${}.{fraction}", group_thousands(whole))
}

/// `None` when the rounded amount does not fit in `i64` cents.
pub fn to_cents(value: Decimal) -> Option<i64> {
    value.round_dp(2).checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Lenient amount parsing for model output and free text: tolerates a leading `$`,
/// comma thousands separators and scientific notation.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|character| !character.is_whitespace() && *character != ',')
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned).or_else(|_| Decimal::from_scientific(&cleaned)).ok()
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, character) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(character);
    }
    grouped
}
