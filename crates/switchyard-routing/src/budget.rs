//! Per-tenant spend tracking with continuous token-bucket refill.
//!
//! A tenant's bucket holds dollars; capacity is the per-period cap and the
//! refill rate spreads one cap evenly over one period. Withdrawal is
//! fail-fast: a request whose estimated cost exceeds the remaining balance
//! is rejected before any backend is invoked.

use crate::{Result, RoutingError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use switchyard_core::{IgnoreLock as _, TenantId, TenantPolicy};

/// Continuous-refill token bucket denominated in USD.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    balance: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket: `capacity` dollars refilling over
    /// `period_secs`.
    #[must_use]
    pub fn new(capacity: f64, period_secs: u64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec: capacity / period_secs.max(1) as f64,
            balance: capacity,
            last_refill: now,
        }
    }

    /// Current balance after refilling up to `now`.
    pub fn balance(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.balance
    }

    /// Withdraws `amount` if the refilled balance covers it.
    pub fn try_withdraw(&mut self, amount: f64, now: Instant) -> bool {
        self.refill(now);
        if amount <= self.balance {
            self.balance -= amount;
            true
        } else {
            false
        }
    }

    /// Returns `amount` to the bucket, clamped at capacity. Used when an
    /// attempt was charged but produced no billable call.
    pub fn deposit(&mut self, amount: f64) {
        self.balance = (self.balance + amount).min(self.capacity);
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.balance =
            (self.balance + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// All tenants' buckets, created lazily from each tenant's policy.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    buckets: Mutex<HashMap<TenantId, TokenBucket>>,
}

impl BudgetLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Withdraws `amount` from the tenant's bucket, creating it full on
    /// first sight.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::BudgetExceeded`] when the balance does not
    /// cover `amount`.
    pub fn try_withdraw(
        &self,
        tenant: &TenantId,
        policy: &TenantPolicy,
        amount: f64,
        now: Instant,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock_ignore_poison();
        let bucket = buckets.entry(tenant.clone()).or_insert_with(|| {
            TokenBucket::new(policy.budget_cap_per_period, policy.budget_period_secs, now)
        });
        if bucket.try_withdraw(amount, now) {
            Ok(())
        } else {
            Err(RoutingError::BudgetExceeded {
                tenant: tenant.clone(),
            })
        }
    }

    /// Refunds the difference when the actual cost came in under the
    /// estimate that was withdrawn.
    pub fn reconcile(&self, tenant: &TenantId, withdrawn: f64, actual: f64) {
        let refund = withdrawn - actual;
        if refund <= 0.0 {
            return;
        }
        let mut buckets = self.buckets.lock_ignore_poison();
        if let Some(bucket) = buckets.get_mut(tenant) {
            bucket.deposit(refund);
        }
    }

    /// Remaining balance for a tenant, if a bucket exists.
    pub fn balance(&self, tenant: &TenantId, now: Instant) -> Option<f64> {
        let mut buckets = self.buckets.lock_ignore_poison();
        buckets.get_mut(tenant).map(|bucket| bucket.balance(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(cap: f64, period_secs: u64) -> TenantPolicy {
        let mut tenant_policy = TenantPolicy::default().with_budget_cap(cap);
        tenant_policy.budget_period_secs = period_secs;
        tenant_policy
    }

    #[test]
    fn test_withdraw_until_exhausted() {
        let ledger = BudgetLedger::new();
        let tenant = TenantId::new("acme");
        let now = Instant::now();
        let tenant_policy = policy(1.0, 3600);

        for _ in 0..10 {
            ledger
                .try_withdraw(&tenant, &tenant_policy, 0.1, now)
                .expect("bucket covers ten withdrawals of a tenth");
        }
        let denied = ledger.try_withdraw(&tenant, &tenant_policy, 0.1, now);
        assert!(matches!(denied, Err(RoutingError::BudgetExceeded { .. })));
    }

    #[test]
    fn test_refill_restores_balance() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(60.0, 60, start);
        assert!(bucket.try_withdraw(60.0, start));
        assert!(!bucket.try_withdraw(1.0, start));

        // One second refills one dollar at this rate.
        let later = start + Duration::from_secs(2);
        assert!(bucket.try_withdraw(1.5, later));
    }

    #[test]
    fn test_refill_clamped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 60, start);
        let much_later = start + Duration::from_secs(3600);
        assert!((bucket.balance(much_later) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_refunds_overestimate() {
        let ledger = BudgetLedger::new();
        let tenant = TenantId::new("acme");
        let now = Instant::now();
        let tenant_policy = policy(1.0, 3600);

        ledger
            .try_withdraw(&tenant, &tenant_policy, 0.8, now)
            .expect("first withdrawal fits");
        ledger.reconcile(&tenant, 0.8, 0.1);

        ledger
            .try_withdraw(&tenant, &tenant_policy, 0.8, now)
            .expect("refund makes room for a second withdrawal");
    }

    #[test]
    fn test_tenants_are_isolated() {
        let ledger = BudgetLedger::new();
        let now = Instant::now();
        let tenant_policy = policy(0.5, 3600);

        ledger
            .try_withdraw(&TenantId::new("acme"), &tenant_policy, 0.5, now)
            .expect("acme spends its whole cap");
        ledger
            .try_withdraw(&TenantId::new("globex"), &tenant_policy, 0.5, now)
            .expect("globex has its own bucket");
    }
}
