//! Installment recording
//!
//! A monthly payment, the bonus it may trigger and the commissions it pays
//! upline are written in one transaction. The gold rate is read before the
//! transaction opens. Payments on the same subscription are serialized by an
//! in-process lock; across processes the partial unique index on completed
//! (kind, month) pairs turns a race into a retried conflict.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Months, Utc};
use lib_storage::ledger::{members, now_unix, payments, subscriptions};
use lib_storage::{SqliteBackend, SqliteConnection};
use lib_types::{
    gold_milligrams, AccountId, Amount, PaymentId, PaymentKind, PaymentStatus, PlanId, SubscriptionId,
    SubscriptionStatus, TransactionKind, UserId,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{GoldHolding, Payment, PaymentReceipt, ScheduleStatus, Subscription};
use crate::config::RetryConfig;
use crate::convert::{count, format_date, positive_minor, to_minor};
use crate::errors::{LedgerError, LedgerResult};
use crate::gateway::{consume_capture_in, CaptureConfirmation};
use crate::plans::{Plan, PlanCatalog};
use crate::pricing::{GoldRate, RateProvider};
use crate::referrals::CommissionEngine;
use crate::retry::with_conflict_retry;
use crate::wallets::{ActivityEntry, WalletStore};

type SubscriptionLock = Arc<tokio::sync::Mutex<()>>;

pub struct SubscriptionLedger {
    backend: SqliteBackend,
    rates: Arc<dyn RateProvider>,
    commissions: CommissionEngine,
    fallback_rate: Amount,
    capture_secret: Option<Arc<str>>,
    retry: RetryConfig,
    locks: Mutex<HashMap<SubscriptionId, SubscriptionLock>>,
}

impl SubscriptionLedger {
    pub fn new(
        backend: SqliteBackend,
        rates: Arc<dyn RateProvider>,
        commissions: CommissionEngine,
        fallback_rate: Amount,
        capture_secret: Option<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            rates,
            commissions,
            fallback_rate,
            capture_secret: capture_secret.map(Arc::from),
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, subscription_id: SubscriptionId) -> SubscriptionLock {
        self.locks.lock().entry(subscription_id).or_default().clone()
    }

    /// Drop the lock of a subscription that takes no more writes
    fn release_if_closed<T>(
        &self,
        subscription_id: SubscriptionId,
        result: &LedgerResult<T>,
        closed: impl Fn(&T) -> bool,
    ) {
        let release = match result {
            Ok(value) => closed(value),
            Err(LedgerError::ScheduleComplete { .. })
            | Err(LedgerError::SubscriptionNotActive { .. })
            | Err(LedgerError::NotFound { entity: "subscription", .. }) => true,
            Err(_) => false,
        };
        if release {
            self.locks.lock().remove(&subscription_id);
        }
    }

    // ========================================================================
    // Enrollment
    // ========================================================================

    /// Enroll a member in a plan, optionally under one of their accounts.
    ///
    /// A member holds one active subscription per account; enrollments
    /// without an account share a single slot.
    pub async fn enroll(
        &self,
        user_id: UserId,
        plan_id: PlanId,
        account_id: Option<AccountId>,
    ) -> LedgerResult<Subscription> {
        let subscription = with_conflict_retry(&self.retry, "enroll", || async move {
            let mut tx = self.backend.begin().await?;
            let uid = user_id.to_string();
            if members::get_member(&mut tx, &uid).await?.is_none() {
                return Err(LedgerError::not_found("member", user_id));
            }
            let plan = PlanCatalog::get_in(&mut tx, plan_id).await?;
            if !plan.active {
                return Err(LedgerError::PlanInactive(plan_id));
            }
            if let Some(account_id) = account_id {
                match members::get_account(&mut tx, &account_id.to_string()).await? {
                    Some(account) if account.user_id == uid => {}
                    _ => return Err(LedgerError::not_found("account", account_id)),
                }
            }
            let account = account_id.map(|a| a.to_string());
            if subscriptions::find_active(&mut tx, &uid, account.as_deref()).await?.is_some() {
                return Err(LedgerError::AlreadyEnrolled { user_id });
            }

            let start = Utc::now().date_naive();
            let end = start
                .checked_add_months(Months::new(plan.duration_months))
                .ok_or_else(|| LedgerError::InvalidInput(format!("plan duration {} overflows", plan.duration_months)))?;
            let now = now_unix();
            let row = subscriptions::SubscriptionRow {
                subscription_id: SubscriptionId::generate().to_string(),
                user_id: uid,
                account_id: account,
                plan_id: plan_id.to_string(),
                start_date: format_date(start),
                end_date: format_date(end),
                status: SubscriptionStatus::Active.as_str().to_string(),
                total_paid: 0,
                bonus_amount: 0,
                final_amount: 0,
                created_at: now,
                updated_at: now,
            };
            subscriptions::insert_subscription(&mut tx, &row).await?;
            SqliteBackend::commit(tx).await?;
            Subscription::try_from(row)
        })
        .await?;

        info!(
            subscription_id = %subscription.subscription_id,
            user_id = %user_id,
            plan_id = %plan_id,
            account_id = ?account_id,
            end_date = %subscription.end_date,
            "subscription enrolled"
        );
        Ok(subscription)
    }

    /// Close an active subscription without a bonus
    pub async fn cancel(&self, subscription_id: SubscriptionId) -> LedgerResult<Subscription> {
        let lock = self.lock_for(subscription_id);
        let _guard = lock.lock().await;

        let result = with_conflict_retry(&self.retry, "cancel subscription", || async move {
            let mut tx = self.backend.begin().await?;
            let current = Self::subscription_in(&mut tx, subscription_id).await?;
            if !current.is_active()
                || !subscriptions::mark_cancelled(&mut tx, &subscription_id.to_string(), now_unix()).await?
            {
                return Err(LedgerError::SubscriptionNotActive {
                    subscription_id,
                    status: current.status,
                });
            }
            let subscription = Self::subscription_in(&mut tx, subscription_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(subscription)
        })
        .await;
        self.release_if_closed(subscription_id, &result, |_| true);
        let subscription = result?;

        info!(subscription_id = %subscription_id, total_paid = %subscription.total_paid, "subscription cancelled");
        Ok(subscription)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Record the next installment at the current gold rate
    pub async fn record_monthly_payment(&self, subscription_id: SubscriptionId) -> LedgerResult<PaymentReceipt> {
        self.record_payment(subscription_id, None).await
    }

    /// Record the next installment from a gateway capture.
    ///
    /// A capture that fails verification is kept as a failed payment and
    /// changes nothing else. The capture amount must equal the installment.
    pub async fn record_verified_payment(
        &self,
        subscription_id: SubscriptionId,
        capture: &CaptureConfirmation,
    ) -> LedgerResult<PaymentReceipt> {
        match capture.verify(self.capture_secret.as_deref()) {
            Ok(()) => {}
            Err(err @ LedgerError::SignatureVerificationFailed(_)) => {
                match self.record_failed_payment(subscription_id, capture).await? {
                    Some(failed) => warn!(
                        subscription_id = %subscription_id,
                        payment_id = %failed.payment_id,
                        gateway_payment_id = %capture.payment_id,
                        "capture rejected, failed payment recorded"
                    ),
                    None => warn!(
                        subscription_id = %subscription_id,
                        gateway_payment_id = %capture.payment_id,
                        "capture rejected for a closed subscription"
                    ),
                }
                return Err(err);
            }
            Err(other) => return Err(other),
        }
        self.record_payment(subscription_id, Some(capture)).await
    }

    async fn record_payment(
        &self,
        subscription_id: SubscriptionId,
        capture: Option<&CaptureConfirmation>,
    ) -> LedgerResult<PaymentReceipt> {
        let lock = self.lock_for(subscription_id);
        let _guard = lock.lock().await;

        let rate = self.rates.current_rate_or(None, self.fallback_rate).await?;
        positive_minor(rate.rate_per_gram, "gold rate")?;
        let rate = &rate;

        let result = with_conflict_retry(&self.retry, "record payment", || async move {
            let mut tx = self.backend.begin().await?;
            let receipt = self.record_payment_in(&mut tx, subscription_id, capture, rate).await?;
            SqliteBackend::commit(tx).await?;
            Ok(receipt)
        })
        .await;
        self.release_if_closed(subscription_id, &result, |receipt: &PaymentReceipt| {
            !receipt.subscription.is_active()
        });
        let receipt = result?;

        info!(
            subscription_id = %subscription_id,
            payment_id = %receipt.payment.payment_id,
            month = receipt.payment.month_number,
            amount = %receipt.payment.amount,
            gold_mg = receipt.payment.gold_mg,
            rate = %rate.rate_per_gram,
            commissions = receipt.commissions.len(),
            "installment recorded"
        );
        if let Some(bonus) = &receipt.bonus_payment {
            info!(
                subscription_id = %subscription_id,
                bonus = %bonus.amount,
                gold_mg = bonus.gold_mg,
                final_amount = %receipt.subscription.final_amount,
                "subscription completed"
            );
        }
        Ok(receipt)
    }

    async fn record_payment_in(
        &self,
        conn: &mut SqliteConnection,
        subscription_id: SubscriptionId,
        capture: Option<&CaptureConfirmation>,
        rate: &GoldRate,
    ) -> LedgerResult<PaymentReceipt> {
        let subscription = Self::subscription_in(conn, subscription_id).await?;
        if subscription.status == SubscriptionStatus::Cancelled {
            return Err(LedgerError::SubscriptionNotActive {
                subscription_id,
                status: subscription.status,
            });
        }
        let plan = PlanCatalog::get_in(conn, subscription.plan_id).await?;
        let sid = subscription_id.to_string();

        let months_paid = count(
            payments::count_completed(conn, &sid, PaymentKind::Monthly.as_str()).await?,
            "completed installments",
        )?;
        let month = months_paid + 1;
        if month > plan.payment_months {
            return Err(LedgerError::ScheduleComplete {
                subscription_id,
                payment_months: plan.payment_months,
            });
        }
        if !subscription.is_active() {
            return Err(LedgerError::SubscriptionNotActive {
                subscription_id,
                status: subscription.status,
            });
        }

        if let Some(capture) = capture {
            if capture.amount != plan.monthly_amount {
                return Err(LedgerError::InvalidAmount(format!(
                    "capture of {} does not match installment {}",
                    capture.amount, plan.monthly_amount
                )));
            }
            consume_capture_in(conn, capture, subscription.user_id, PaymentKind::Monthly.as_str()).await?;
        }

        let payment = Self::insert_completed_in(
            conn,
            &subscription,
            PaymentKind::Monthly,
            month,
            plan.monthly_amount,
            rate,
            capture,
        )
        .await?;
        if !subscriptions::add_to_total_paid(conn, &sid, to_minor(plan.monthly_amount, "installment")?, now_unix())
            .await?
        {
            return Err(LedgerError::SubscriptionNotActive {
                subscription_id,
                status: subscription.status,
            });
        }
        WalletStore::log_in(
            conn,
            ActivityEntry {
                user_id: subscription.user_id,
                account_id: subscription.account_id,
                kind: TransactionKind::Investment,
                amount: plan.monthly_amount,
                reference: Some(payment.payment_id.to_string()),
                description: format!("{} installment {}/{}", plan.name, month, plan.payment_months),
            },
        )
        .await?;

        let commissions = self
            .commissions
            .apply_in(conn, subscription.user_id, plan.monthly_amount, payment.payment_id)
            .await?;

        let bonus_payment = if month == plan.payment_months {
            Self::complete_in(conn, &subscription, &plan, rate).await?
        } else {
            None
        };

        Ok(PaymentReceipt {
            payment,
            bonus_payment,
            commissions,
            subscription: Self::subscription_in(conn, subscription_id).await?,
            rate: rate.clone(),
        })
    }

    /// Award the bonus and close the subscription
    async fn complete_in(
        conn: &mut SqliteConnection,
        subscription: &Subscription,
        plan: &Plan,
        rate: &GoldRate,
    ) -> LedgerResult<Option<Payment>> {
        let total_paid = subscription.total_paid + plan.monthly_amount;
        let bonus = plan.bonus_for(total_paid);

        let bonus_payment = if bonus > Decimal::ZERO {
            let payment = Self::insert_completed_in(
                conn,
                subscription,
                PaymentKind::Bonus,
                plan.bonus_month(),
                bonus,
                rate,
                None,
            )
            .await?;
            WalletStore::log_in(
                conn,
                ActivityEntry {
                    user_id: subscription.user_id,
                    account_id: subscription.account_id,
                    kind: TransactionKind::Bonus,
                    amount: bonus,
                    reference: Some(payment.payment_id.to_string()),
                    description: format!("{} completion bonus", plan.name),
                },
            )
            .await?;
            Some(payment)
        } else {
            None
        };

        let completed = subscriptions::mark_completed(
            conn,
            &subscription.subscription_id.to_string(),
            to_minor(bonus, "bonus")?,
            now_unix(),
        )
        .await?;
        if !completed {
            return Err(LedgerError::SubscriptionNotActive {
                subscription_id: subscription.subscription_id,
                status: subscription.status,
            });
        }
        debug!(subscription_id = %subscription.subscription_id, %bonus, "bonus awarded");
        Ok(bonus_payment)
    }

    /// Insert a completed payment, its gold holding and the wallet gold credit
    async fn insert_completed_in(
        conn: &mut SqliteConnection,
        subscription: &Subscription,
        kind: PaymentKind,
        month: u32,
        amount: Amount,
        rate: &GoldRate,
        capture: Option<&CaptureConfirmation>,
    ) -> LedgerResult<Payment> {
        let gold_mg = gold_milligrams(amount, rate.rate_per_gram)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("cannot price {} at {}", amount, rate.rate_per_gram)))?;
        let row = payments::PaymentRow {
            payment_id: PaymentId::generate().to_string(),
            subscription_id: subscription.subscription_id.to_string(),
            user_id: subscription.user_id.to_string(),
            kind: kind.as_str().to_string(),
            month_number: i64::from(month),
            amount: positive_minor(amount, "payment amount")?,
            gold_rate: positive_minor(rate.rate_per_gram, "gold rate")?,
            gold_milligrams: gold_mg,
            status: PaymentStatus::Completed.as_str().to_string(),
            gateway_order_id: capture.map(|c| c.order_id.clone()),
            gateway_payment_id: capture.map(|c| c.payment_id.clone()),
            created_at: now_unix(),
        };
        payments::insert_payment(conn, &row).await?;
        payments::insert_holding(conn, &row, kind.holding_kind().as_str()).await?;
        WalletStore::credit_gold_in(conn, subscription.user_id, gold_mg).await?;
        Payment::try_from(row)
    }

    /// Keep a rejected capture for audit.
    ///
    /// Nothing is written when the subscription takes no more installments.
    async fn record_failed_payment(
        &self,
        subscription_id: SubscriptionId,
        capture: &CaptureConfirmation,
    ) -> LedgerResult<Option<Payment>> {
        let rate = self.rates.current_rate_or(None, self.fallback_rate).await?;
        let rate_minor = positive_minor(rate.rate_per_gram, "gold rate")?;

        with_conflict_retry(&self.retry, "record failed payment", || async move {
            let mut tx = self.backend.begin().await?;
            let subscription = Self::subscription_in(&mut tx, subscription_id).await?;
            let plan = PlanCatalog::get_in(&mut tx, subscription.plan_id).await?;
            let sid = subscription_id.to_string();
            let months_paid = count(
                payments::count_completed(&mut tx, &sid, PaymentKind::Monthly.as_str()).await?,
                "completed installments",
            )?;
            if !subscription.is_active() || months_paid >= plan.payment_months {
                return Ok(None);
            }

            let row = payments::PaymentRow {
                payment_id: PaymentId::generate().to_string(),
                subscription_id: sid,
                user_id: subscription.user_id.to_string(),
                kind: PaymentKind::Monthly.as_str().to_string(),
                month_number: i64::from(months_paid + 1),
                amount: to_minor(plan.monthly_amount, "installment")?,
                gold_rate: rate_minor,
                gold_milligrams: 0.0,
                status: PaymentStatus::Failed.as_str().to_string(),
                gateway_order_id: Some(capture.order_id.clone()),
                gateway_payment_id: Some(capture.payment_id.clone()),
                created_at: now_unix(),
            };
            payments::insert_payment(&mut tx, &row).await?;
            SqliteBackend::commit(tx).await?;
            Payment::try_from(row).map(Some)
        })
        .await
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn subscription(&self, subscription_id: SubscriptionId) -> LedgerResult<Subscription> {
        let mut conn = self.backend.acquire().await?;
        Self::subscription_in(&mut conn, subscription_id).await
    }

    async fn subscription_in(conn: &mut SqliteConnection, subscription_id: SubscriptionId) -> LedgerResult<Subscription> {
        subscriptions::get_subscription(conn, &subscription_id.to_string())
            .await?
            .ok_or_else(|| LedgerError::not_found("subscription", subscription_id))?
            .try_into()
    }

    pub async fn active_subscription(
        &self,
        user_id: UserId,
        account_id: Option<AccountId>,
    ) -> LedgerResult<Option<Subscription>> {
        let account = account_id.map(|a| a.to_string());
        let mut conn = self.backend.acquire().await?;
        subscriptions::find_active(&mut conn, &user_id.to_string(), account.as_deref())
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    /// Every subscription of a member, newest first
    pub async fn subscriptions_for(&self, user_id: UserId) -> LedgerResult<Vec<Subscription>> {
        let mut conn = self.backend.acquire().await?;
        subscriptions::list_for_user(&mut conn, &user_id.to_string())
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    /// Payments of a subscription in schedule order, failed attempts included
    pub async fn payments(&self, subscription_id: SubscriptionId) -> LedgerResult<Vec<Payment>> {
        let mut conn = self.backend.acquire().await?;
        payments::list_for_subscription(&mut conn, &subscription_id.to_string())
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    pub async fn gold_holdings(&self, user_id: UserId) -> LedgerResult<Vec<GoldHolding>> {
        let mut conn = self.backend.acquire().await?;
        payments::holdings_for_user(&mut conn, &user_id.to_string())
            .await?
            .into_iter()
            .map(GoldHolding::try_from)
            .collect()
    }

    pub async fn schedule(&self, subscription_id: SubscriptionId) -> LedgerResult<ScheduleStatus> {
        let mut conn = self.backend.acquire().await?;
        let subscription = Self::subscription_in(&mut conn, subscription_id).await?;
        let plan = PlanCatalog::get_in(&mut conn, subscription.plan_id).await?;
        let sid = subscription_id.to_string();
        let months_paid = count(
            payments::count_completed(&mut conn, &sid, PaymentKind::Monthly.as_str()).await?,
            "completed installments",
        )?;
        let gold_mg = payments::gold_for_subscription(&mut conn, &sid).await?;

        let remaining_months = plan.payment_months.saturating_sub(months_paid);
        let next_due_month = (subscription.is_active() && remaining_months > 0).then_some(months_paid + 1);
        Ok(ScheduleStatus {
            subscription_id,
            status: subscription.status,
            months_paid,
            payment_months: plan.payment_months,
            next_due_month,
            remaining_months,
            pending_amount: plan.monthly_amount * Decimal::from(remaining_months),
            total_paid: subscription.total_paid,
            gold_mg,
        })
    }
}

impl std::fmt::Debug for SubscriptionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLedger")
            .field("fallback_rate", &self.fallback_rate)
            .field("retry", &self.retry)
            .field("open_locks", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}
