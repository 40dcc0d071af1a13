//! Savings ledger status and classification enums.
//!
//! Pure data types. Each enum has a stable lowercase text form used as the
//! persisted column value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ParseEnumError;

/// Default cap on referral depth observed in production
pub const DEFAULT_MAX_REFERRAL_DEPTH: u32 = 10;

/// Maximum investment accounts a single member may open
pub const MAX_ACCOUNTS_PER_USER: usize = 10;

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Accepting monthly payments
    Active,
    /// Schedule fully paid and bonus issued
    Completed,
    /// Closed early; no further payments
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "completed" => Ok(SubscriptionStatus::Completed),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(ParseEnumError::new("subscription status", other)),
        }
    }
}

/// Settlement state of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    /// Rejected before completion (e.g. capture signature mismatch)
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

/// What a payment row represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Scheduled installment paid by the member
    #[serde(rename = "monthly_payment")]
    Monthly,
    /// Completion bonus issued by the ledger
    Bonus,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Monthly => "monthly_payment",
            PaymentKind::Bonus => "bonus",
        }
    }

    /// Gold holding classification for gold credited by this payment
    pub fn holding_kind(&self) -> HoldingKind {
        match self {
            PaymentKind::Monthly => HoldingKind::MonthlyPurchase,
            PaymentKind::Bonus => HoldingKind::BonusGold,
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly_payment" => Ok(PaymentKind::Monthly),
            "bonus" => Ok(PaymentKind::Bonus),
            other => Err(ParseEnumError::new("payment kind", other)),
        }
    }
}

/// Origin of a gold holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingKind {
    MonthlyPurchase,
    BonusGold,
}

impl HoldingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingKind::MonthlyPurchase => "monthly_purchase",
            HoldingKind::BonusGold => "bonus_gold",
        }
    }
}

impl fmt::Display for HoldingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldingKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly_purchase" => Ok(HoldingKind::MonthlyPurchase),
            "bonus_gold" => Ok(HoldingKind::BonusGold),
            other => Err(ParseEnumError::new("holding kind", other)),
        }
    }
}

/// Balance column of a wallet that can be credited or debited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletField {
    SavingsBalance,
    ReferralBalance,
    GoldBalanceMg,
    TotalEarnings,
    TotalWithdrawn,
}

impl WalletField {
    pub const ALL: &'static [WalletField] = &[
        WalletField::SavingsBalance,
        WalletField::ReferralBalance,
        WalletField::GoldBalanceMg,
        WalletField::TotalEarnings,
        WalletField::TotalWithdrawn,
    ];

    /// Persisted column name
    pub fn column(&self) -> &'static str {
        match self {
            WalletField::SavingsBalance => "savings_balance",
            WalletField::ReferralBalance => "referral_balance",
            WalletField::GoldBalanceMg => "gold_balance_mg",
            WalletField::TotalEarnings => "total_earnings",
            WalletField::TotalWithdrawn => "total_withdrawn",
        }
    }

    /// Whether this field is part of `total_balance`
    pub fn affects_total(&self) -> bool {
        matches!(self, WalletField::SavingsBalance | WalletField::ReferralBalance)
    }

    /// Whether this field holds gold mass rather than currency
    pub fn is_gold(&self) -> bool {
        matches!(self, WalletField::GoldBalanceMg)
    }
}

impl fmt::Display for WalletField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Balance a withdrawal is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalSource {
    Savings,
    Referral,
}

impl WithdrawalSource {
    pub fn field(&self) -> WalletField {
        match self {
            WithdrawalSource::Savings => WalletField::SavingsBalance,
            WithdrawalSource::Referral => WalletField::ReferralBalance,
        }
    }
}

/// Activity log classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Monthly installment into a plan
    Investment,
    /// Completion bonus
    Bonus,
    /// Referral commission received
    Commission,
    /// Wallet top-up through the payment gateway
    WalletTopup,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Investment => "investment",
            TransactionKind::Bonus => "bonus",
            TransactionKind::Commission => "commission",
            TransactionKind::WalletTopup => "wallet_topup",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investment" => Ok(TransactionKind::Investment),
            "bonus" => Ok(TransactionKind::Bonus),
            "commission" => Ok(TransactionKind::Commission),
            "wallet_topup" => Ok(TransactionKind::WalletTopup),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(ParseEnumError::new("transaction kind", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_roundtrip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Completed,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_payment_kind_maps_to_holding_kind() {
        assert_eq!(PaymentKind::Monthly.holding_kind(), HoldingKind::MonthlyPurchase);
        assert_eq!(PaymentKind::Bonus.holding_kind(), HoldingKind::BonusGold);
    }

    fn json_text<T: Serialize>(value: &T) -> String {
        serde_json::to_value(value).unwrap().as_str().unwrap().to_string()
    }

    #[test]
    fn test_json_names_match_stored_text() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Completed,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(json_text(&status), status.as_str());
        }
        for status in [PaymentStatus::Pending, PaymentStatus::Completed, PaymentStatus::Failed] {
            assert_eq!(json_text(&status), status.as_str());
        }
        for kind in [PaymentKind::Monthly, PaymentKind::Bonus] {
            assert_eq!(json_text(&kind), kind.as_str());
            assert_eq!(json_text(&kind.holding_kind()), kind.holding_kind().as_str());
        }
        for kind in [
            TransactionKind::Investment,
            TransactionKind::Bonus,
            TransactionKind::Commission,
            TransactionKind::WalletTopup,
            TransactionKind::Withdrawal,
        ] {
            assert_eq!(json_text(&kind), kind.as_str());
        }
        for field in WalletField::ALL {
            assert_eq!(json_text(field), field.column());
        }

        let kind: PaymentKind = serde_json::from_str("\"monthly_payment\"").unwrap();
        assert_eq!(kind, PaymentKind::Monthly);
        assert!(serde_json::from_str::<PaymentKind>("\"monthly\"").is_err());
    }

    #[test]
    fn test_only_savings_and_referral_affect_total() {
        let affecting: Vec<_> = WalletField::ALL
            .iter()
            .filter(|f| f.affects_total())
            .collect();
        assert_eq!(affecting, vec![&WalletField::SavingsBalance, &WalletField::ReferralBalance]);
    }
}
