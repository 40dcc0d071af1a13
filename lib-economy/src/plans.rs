//! Plan catalog
//!
//! Plans are templates for subscriptions. Their terms are frozen while any
//! active subscription references them; retiring a plan only closes it to new
//! enrollments.

use chrono::{DateTime, Utc};
use lib_storage::ledger::{now_unix, plans};
use lib_storage::{SqliteBackend, SqliteConnection};
use lib_types::{round_money, Amount, Percentage, PlanId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::convert::{count, from_minor, parse_field, parse_opt_field, positive_minor, timestamp, to_minor};
use crate::errors::{LedgerError, LedgerResult};

/// Plan terms as supplied by an administrator or the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub monthly_amount: Amount,
    pub duration_months: u32,
    /// Installments the member pays; the rest of the term is covered by the bonus
    pub payment_months: u32,
    /// Shown to members; used for the bonus only when no fixed amount is set
    #[serde(default)]
    pub bonus_percentage: Option<Percentage>,
    #[serde(default)]
    pub bonus_amount: Option<Amount>,
}

impl NewPlan {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("plan name is empty".into()));
        }
        positive_minor(self.monthly_amount, "monthly amount")?;
        if self.duration_months == 0 || self.payment_months == 0 {
            return Err(LedgerError::InvalidInput("plan months must be positive".into()));
        }
        if self.payment_months > self.duration_months {
            return Err(LedgerError::InvalidInput(format!(
                "payment months {} exceed duration {}",
                self.payment_months, self.duration_months
            )));
        }
        if let Some(pct) = self.bonus_percentage {
            if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(LedgerError::InvalidInput(format!("bonus percentage {} outside 0..=100", pct)));
            }
        }
        if let Some(bonus) = self.bonus_amount {
            if bonus < Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(format!("bonus amount {} is negative", bonus)));
            }
            to_minor(bonus, "bonus amount")?;
        }
        Ok(())
    }

    fn to_row(&self, plan_id: PlanId, active: bool, created_at: i64) -> LedgerResult<plans::PlanRow> {
        Ok(plans::PlanRow {
            plan_id: plan_id.to_string(),
            name: self.name.trim().to_string(),
            monthly_amount: to_minor(self.monthly_amount, "monthly amount")?,
            duration_months: i64::from(self.duration_months),
            payment_months: i64::from(self.payment_months),
            bonus_percentage: self.bonus_percentage.map(|p| p.normalize().to_string()),
            bonus_amount: self.bonus_amount.map(|b| to_minor(b, "bonus amount")).transpose()?,
            active,
            created_at,
        })
    }
}

/// Savings plan template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub name: String,
    pub monthly_amount: Amount,
    pub duration_months: u32,
    pub payment_months: u32,
    pub bonus_percentage: Option<Percentage>,
    pub bonus_amount: Option<Amount>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Completion bonus for a fully paid schedule.
    ///
    /// A fixed amount wins; otherwise the percentage of `total_paid`, rounded
    /// half-up to paise; otherwise nothing.
    pub fn bonus_for(&self, total_paid: Amount) -> Amount {
        if let Some(fixed) = self.bonus_amount {
            return fixed;
        }
        match self.bonus_percentage {
            Some(pct) => round_money(total_paid * pct / Decimal::ONE_HUNDRED),
            None => Decimal::ZERO,
        }
    }

    /// Month index under which the bonus payment is recorded
    pub fn bonus_month(&self) -> u32 {
        self.duration_months
    }

    /// Sum of all installments
    pub fn scheduled_total(&self) -> Amount {
        self.monthly_amount * Decimal::from(self.payment_months)
    }
}

impl TryFrom<plans::PlanRow> for Plan {
    type Error = LedgerError;

    fn try_from(row: plans::PlanRow) -> LedgerResult<Self> {
        Ok(Self {
            plan_id: parse_field(&row.plan_id, "plan id")?,
            name: row.name,
            monthly_amount: from_minor(row.monthly_amount),
            duration_months: count(row.duration_months, "duration months")?,
            payment_months: count(row.payment_months, "payment months")?,
            bonus_percentage: parse_opt_field(row.bonus_percentage.as_deref(), "bonus percentage")?,
            bonus_amount: row.bonus_amount.map(from_minor),
            active: row.active,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Plan administration and lookup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    backend: SqliteBackend,
}

impl PlanCatalog {
    pub fn new(backend: SqliteBackend) -> Self {
        Self { backend }
    }

    pub async fn create(&self, new_plan: &NewPlan) -> LedgerResult<Plan> {
        new_plan.validate()?;
        let row = new_plan.to_row(PlanId::generate(), true, now_unix())?;

        let mut conn = self.backend.acquire().await?;
        plans::insert_plan(&mut conn, &row).await?;

        let plan = Plan::try_from(row)?;
        info!(plan_id = %plan.plan_id, name = %plan.name, monthly = %plan.monthly_amount, "plan created");
        Ok(plan)
    }

    pub async fn get(&self, plan_id: PlanId) -> LedgerResult<Plan> {
        let mut conn = self.backend.acquire().await?;
        Self::get_in(&mut conn, plan_id).await
    }

    pub(crate) async fn get_in(conn: &mut SqliteConnection, plan_id: PlanId) -> LedgerResult<Plan> {
        plans::get_plan(conn, &plan_id.to_string())
            .await?
            .ok_or_else(|| LedgerError::not_found("plan", plan_id))?
            .try_into()
    }

    pub async fn find_by_name(&self, name: &str) -> LedgerResult<Option<Plan>> {
        let mut conn = self.backend.acquire().await?;
        plans::find_plan_by_name(&mut conn, name.trim())
            .await?
            .map(Plan::try_from)
            .transpose()
    }

    pub async fn list(&self, active_only: bool) -> LedgerResult<Vec<Plan>> {
        let mut conn = self.backend.acquire().await?;
        plans::list_plans(&mut conn, active_only)
            .await?
            .into_iter()
            .map(Plan::try_from)
            .collect()
    }

    /// Replace a plan's terms; refused while an active subscription uses it
    pub async fn update(&self, plan_id: PlanId, terms: &NewPlan) -> LedgerResult<Plan> {
        terms.validate()?;
        let mut tx = self.backend.begin().await?;
        let existing = Self::get_in(&mut tx, plan_id).await?;
        if plans::count_active_subscriptions(&mut tx, &plan_id.to_string()).await? > 0 {
            return Err(LedgerError::PlanInUse(plan_id));
        }
        let row = terms.to_row(plan_id, existing.active, existing.created_at.timestamp())?;
        plans::update_plan_terms(&mut tx, &row).await?;
        SqliteBackend::commit(tx).await?;

        info!(plan_id = %plan_id, "plan terms updated");
        Plan::try_from(row)
    }

    /// Close a plan to new enrollments; running subscriptions continue
    pub async fn retire(&self, plan_id: PlanId) -> LedgerResult<()> {
        self.set_active(plan_id, false).await
    }

    pub async fn reopen(&self, plan_id: PlanId) -> LedgerResult<()> {
        self.set_active(plan_id, true).await
    }

    async fn set_active(&self, plan_id: PlanId, active: bool) -> LedgerResult<()> {
        let mut conn = self.backend.acquire().await?;
        if !plans::set_plan_active(&mut conn, &plan_id.to_string(), active).await? {
            return Err(LedgerError::not_found("plan", plan_id));
        }
        info!(plan_id = %plan_id, active, "plan availability changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gold_1000() -> NewPlan {
        NewPlan {
            name: "Gold 1000".to_string(),
            monthly_amount: dec!(1000),
            duration_months: 12,
            payment_months: 12,
            bonus_percentage: None,
            bonus_amount: Some(dec!(4500)),
        }
    }

    async fn catalog() -> PlanCatalog {
        PlanCatalog::new(SqliteBackend::open_in_memory().await.unwrap())
    }

    #[test]
    fn test_bonus_prefers_fixed_amount() {
        let mut plan = Plan {
            plan_id: PlanId::generate(),
            name: "p".into(),
            monthly_amount: dec!(1000),
            duration_months: 12,
            payment_months: 11,
            bonus_percentage: Some(dec!(8.33)),
            bonus_amount: Some(dec!(4500)),
            active: true,
            created_at: Utc::now(),
        };
        assert_eq!(plan.bonus_for(dec!(11000)), dec!(4500));

        plan.bonus_amount = None;
        // 11000 * 8.33% = 916.30
        assert_eq!(plan.bonus_for(dec!(11000)), dec!(916.30));

        plan.bonus_percentage = None;
        assert_eq!(plan.bonus_for(dec!(11000)), Decimal::ZERO);
        assert_eq!(plan.bonus_month(), 12);
        assert_eq!(plan.scheduled_total(), dec!(11000));
    }

    #[test]
    fn test_validation() {
        assert!(gold_1000().validate().is_ok());

        let mut bad = gold_1000();
        bad.payment_months = 13;
        assert!(matches!(bad.validate(), Err(LedgerError::InvalidInput(_))));

        let mut bad = gold_1000();
        bad.monthly_amount = dec!(0);
        assert!(matches!(bad.validate(), Err(LedgerError::InvalidAmount(_))));

        let mut bad = gold_1000();
        bad.name = "  ".into();
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_list_retire() {
        let catalog = catalog().await;
        let plan = catalog.create(&gold_1000()).await.unwrap();
        assert_eq!(catalog.get(plan.plan_id).await.unwrap(), plan);
        assert_eq!(catalog.find_by_name("Gold 1000").await.unwrap(), Some(plan.clone()));

        catalog.retire(plan.plan_id).await.unwrap();
        assert!(catalog.list(true).await.unwrap().is_empty());
        assert_eq!(catalog.list(false).await.unwrap().len(), 1);

        catalog.reopen(plan.plan_id).await.unwrap();
        assert_eq!(catalog.list(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unused_plan() {
        let catalog = catalog().await;
        let plan = catalog.create(&gold_1000()).await.unwrap();

        let mut terms = gold_1000();
        terms.monthly_amount = dec!(2000);
        terms.bonus_amount = None;
        terms.bonus_percentage = Some(dec!(5));
        let updated = catalog.update(plan.plan_id, &terms).await.unwrap();
        assert_eq!(updated.monthly_amount, dec!(2000));
        assert_eq!(catalog.get(plan.plan_id).await.unwrap().bonus_percentage, Some(dec!(5)));
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let catalog = catalog().await;
        let missing = PlanId::generate();
        assert!(matches!(catalog.get(missing).await, Err(LedgerError::NotFound { .. })));
        assert!(matches!(catalog.retire(missing).await, Err(LedgerError::NotFound { .. })));
    }
}
