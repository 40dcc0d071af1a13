//! Canonical primitive types for the savings ledger
//!
//! Identifiers are UUID newtypes so a plan id can never be passed where a
//! subscription id is expected. Money is a `Decimal` amount of rupees; the
//! store keeps it as integer paise, so every amount entering the ledger must
//! fit in two decimal places.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Currency amount in rupees
pub type Amount = Decimal;

/// Commission or bonus percentage (10 = 10%)
pub type Percentage = Decimal;

/// Gold mass in milligrams
pub type Milligrams = f64;

/// Number of decimal places kept for currency
pub const MONEY_SCALE: u32 = 2;

/// Decimal places kept when converting a purchase into gold mass
pub const GOLD_SCALE: u32 = 6;

// ============================================================================
// IDENTIFIERS
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.simple().to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Registered member (login identity)
    UserId
);
define_id!(
    /// Investment account owned by a member
    AccountId
);
define_id!(
    /// Savings plan template
    PlanId
);
define_id!(
    /// Enrollment of a member in a plan
    SubscriptionId
);
define_id!(
    /// Installment or bonus payment, also the source key for commissions
    PaymentId
);

// ============================================================================
// MONEY
// ============================================================================

/// Round a currency amount to paise, half away from zero
pub fn round_money(amount: Amount) -> Amount {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert rupees to integer paise.
///
/// Returns `None` when the amount carries more than two decimals or does not
/// fit in an `i64`.
pub fn to_minor_units(amount: Amount) -> Option<i64> {
    if amount.normalize().scale() > MONEY_SCALE {
        return None;
    }
    (amount * Decimal::ONE_HUNDRED).to_i64()
}

/// Convert integer paise back to rupees
pub fn from_minor_units(minor: i64) -> Amount {
    Decimal::new(minor, MONEY_SCALE)
}

/// Gold mass bought by `amount` at `rate_per_gram`: `amount / rate * 1000` mg.
///
/// Returns `None` for a non-positive rate.
pub fn gold_milligrams(amount: Amount, rate_per_gram: Amount) -> Option<Milligrams> {
    if rate_per_gram <= Decimal::ZERO {
        return None;
    }
    let grams = amount.checked_div(rate_per_gram)?;
    (grams * Decimal::ONE_THOUSAND).round_dp(GOLD_SCALE).to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minor_units_roundtrip_two_decimals() {
        assert_eq!(to_minor_units(dec!(1000)), Some(100_000));
        assert_eq!(to_minor_units(dec!(12.34)), Some(1234));
        assert_eq!(to_minor_units(dec!(12.340)), Some(1234));
        assert_eq!(from_minor_units(1234), dec!(12.34));
    }

    #[test]
    fn test_minor_units_rejects_sub_paise() {
        assert_eq!(to_minor_units(dec!(0.001)), None);
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(0.124)), dec!(0.12));
        assert_eq!(round_money(dec!(100)), dec!(100));
    }

    #[test]
    fn test_gold_milligrams_at_reference_rate() {
        let mg = gold_milligrams(dec!(1000), dec!(6500)).unwrap();
        assert!((mg - 153.846).abs() < 0.001);
    }

    #[test]
    fn test_gold_milligrams_rejects_zero_rate() {
        assert!(gold_milligrams(dec!(1000), Decimal::ZERO).is_none());
        assert!(gold_milligrams(dec!(1000), dec!(-1)).is_none());
    }

    #[test]
    fn test_id_display_and_parse() {
        let id = UserId::generate();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(format!("{:?}", id).starts_with("UserId("));
    }
}
