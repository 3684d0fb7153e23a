//! Protocol-fee math, ported from the original tipping rules: percentage
//! fee with a floor, floor-truncation to the coin's display precision, and
//! the canned fee destination item.

use crate::registry::CoinConfig;
use crate::types::{DestinationItem, TransferPurpose};
use rust_decimal::{Decimal, RoundingStrategy};

/// Truncates a native-unit value to the coin's precision, always toward
/// zero so a user is never shown more than is actually sent.
pub fn coin_format(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Percentage fee with a floor: `percent`% of `value`, but never less than
/// `min_value` while a fee applies at all.
pub fn calc_fee(value: Decimal, percent: Decimal, min_value: Decimal) -> Decimal {
    let mut fee = value / Decimal::from(100) * percent;
    if fee < min_value && percent > Decimal::ZERO {
        fee = min_value;
    }
    fee
}

/// Minimum lottery pot for a coin, derived from its minimum transfer value.
pub fn min_pot_value(min_value: Decimal) -> Decimal {
    if min_value < Decimal::ONE {
        min_value * Decimal::from(20)
    } else {
        min_value * Decimal::from(50)
    }
}

/// Destination item routing a protocol fee to the coin's fee wallet.
pub fn fee_item(fee: Decimal, coin: &CoinConfig) -> DestinationItem {
    DestinationItem {
        label: "fee".to_string(),
        mention: "fee".to_string(),
        address: coin.fee_wallet.clone(),
        owner: None,
        value: coin_format(fee, coin.decimals),
        purpose: TransferPurpose::Fee,
        aux_ref: None,
    }
}
