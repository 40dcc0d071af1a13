//! Subscription ledger
//!
//! Enrollment, the monthly installment schedule, gold accrual and the
//! completion bonus. Records here are the domain view of the
//! `subscriptions`, `payments` and `gold_holdings` rows.

pub mod ledger;

use chrono::{DateTime, NaiveDate, Utc};
use lib_storage::ledger::{payments, subscriptions};
use lib_types::{
    AccountId, Amount, HoldingKind, Milligrams, PaymentId, PaymentKind, PaymentStatus, PlanId, SubscriptionId,
    SubscriptionStatus, UserId,
};
use serde::{Deserialize, Serialize};

use crate::convert::{count, from_minor, parse_date, parse_field, parse_opt_field, timestamp};
use crate::errors::{LedgerError, LedgerResult};
use crate::pricing::GoldRate;
use crate::referrals::CommissionRecord;

pub use ledger::SubscriptionLedger;

/// A member's enrollment in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub plan_id: PlanId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: SubscriptionStatus,
    /// Sum of completed monthly installments
    pub total_paid: Amount,
    /// Zero until the schedule completes
    pub bonus_amount: Amount,
    /// `total_paid + bonus_amount` once completed, zero before
    pub final_amount: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

impl TryFrom<subscriptions::SubscriptionRow> for Subscription {
    type Error = LedgerError;

    fn try_from(row: subscriptions::SubscriptionRow) -> LedgerResult<Self> {
        Ok(Self {
            subscription_id: parse_field(&row.subscription_id, "subscription id")?,
            user_id: parse_field(&row.user_id, "subscriber id")?,
            account_id: parse_opt_field(row.account_id.as_deref(), "subscription account")?,
            plan_id: parse_field(&row.plan_id, "plan id")?,
            start_date: parse_date(&row.start_date)?,
            end_date: parse_date(&row.end_date)?,
            status: parse_field(&row.status, "subscription status")?,
            total_paid: from_minor(row.total_paid),
            bonus_amount: from_minor(row.bonus_amount),
            final_amount: from_minor(row.final_amount),
            created_at: timestamp(row.created_at)?,
            updated_at: timestamp(row.updated_at)?,
        })
    }
}

/// Installment or bonus event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub kind: PaymentKind,
    /// Installment index, or the plan duration for the bonus
    pub month_number: u32,
    pub amount: Amount,
    /// Rupees per gram applied
    pub gold_rate: Amount,
    pub gold_mg: Milligrams,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<payments::PaymentRow> for Payment {
    type Error = LedgerError;

    fn try_from(row: payments::PaymentRow) -> LedgerResult<Self> {
        Ok(Self {
            payment_id: parse_field(&row.payment_id, "payment id")?,
            subscription_id: parse_field(&row.subscription_id, "payment subscription")?,
            user_id: parse_field(&row.user_id, "payer id")?,
            kind: parse_field(&row.kind, "payment kind")?,
            month_number: count(row.month_number, "month number")?,
            amount: from_minor(row.amount),
            gold_rate: from_minor(row.gold_rate),
            gold_mg: row.gold_milligrams,
            status: parse_field(&row.status, "payment status")?,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Gold credited by one completed payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldHolding {
    pub holding_id: i64,
    pub user_id: UserId,
    pub subscription_id: SubscriptionId,
    pub payment_id: PaymentId,
    pub amount_paid: Amount,
    pub gold_rate: Amount,
    pub gold_mg: Milligrams,
    pub kind: HoldingKind,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<payments::HoldingRow> for GoldHolding {
    type Error = LedgerError;

    fn try_from(row: payments::HoldingRow) -> LedgerResult<Self> {
        Ok(Self {
            holding_id: row.holding_id,
            user_id: parse_field(&row.user_id, "holding owner")?,
            subscription_id: parse_field(&row.subscription_id, "holding subscription")?,
            payment_id: parse_field(&row.payment_id, "holding payment")?,
            amount_paid: from_minor(row.amount_paid),
            gold_rate: from_minor(row.gold_rate),
            gold_mg: row.gold_milligrams,
            kind: parse_field(&row.kind, "holding kind")?,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Everything a recorded installment produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    /// Present when this installment completed the schedule with a bonus
    pub bonus_payment: Option<Payment>,
    pub commissions: Vec<CommissionRecord>,
    /// State after the installment
    pub subscription: Subscription,
    pub rate: GoldRate,
}

/// Progress through the installment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub subscription_id: SubscriptionId,
    pub status: SubscriptionStatus,
    pub months_paid: u32,
    pub payment_months: u32,
    /// `None` once nothing more can be paid
    pub next_due_month: Option<u32>,
    pub remaining_months: u32,
    pub pending_amount: Amount,
    pub total_paid: Amount,
    pub gold_mg: Milligrams,
}
