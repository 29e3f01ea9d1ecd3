//! Per-tenant wallet balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::money::checked_sum;
use crate::types::{TenantId, WalletId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub tenant_id: TenantId,
    pub balance: Decimal,
    pub currency: String,
    pub total_credited: Decimal,
    pub total_debited: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_mutation_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn new(tenant_id: TenantId, currency: impl Into<String>) -> Self {
        Self {
            id: WalletId::new(),
            tenant_id,
            balance: Decimal::ZERO,
            currency: currency.into(),
            total_credited: Decimal::ZERO,
            total_debited: Decimal::ZERO,
            active: true,
            created_at: Utc::now(),
            last_mutation_at: None,
        }
    }

    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Applies a signed amount and returns `(balance_before, balance_after)`.
    ///
    /// Callers check affordability first; this never clamps. An unrepresentable
    /// balance or running total fails with `InvalidAmount` and leaves the
    /// wallet untouched.
    pub(crate) fn apply(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Decimal, Decimal)> {
        let before = self.balance;
        let after = checked_sum(before, amount)?;
        if amount.is_sign_positive() {
            self.total_credited = checked_sum(self.total_credited, amount)?;
        } else {
            self.total_debited = checked_sum(self.total_debited, -amount)?;
        }
        self.balance = after;
        self.last_mutation_at = Some(now);
        Ok((before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wallet_apply_tracks_totals() {
        let mut wallet = Wallet::new(TenantId::new("t"), "IDR");
        let now = Utc::now();

        assert_eq!(wallet.apply(dec!(10000), now).unwrap(), (dec!(0), dec!(10000)));
        assert_eq!(
            wallet.apply(dec!(-3000.25), now).unwrap(),
            (dec!(10000), dec!(6999.75))
        );

        assert_eq!(wallet.total_credited, dec!(10000));
        assert_eq!(wallet.total_debited, dec!(3000.25));
        assert_eq!(
            wallet.balance,
            wallet.total_credited - wallet.total_debited
        );
        assert_eq!(wallet.last_mutation_at, Some(now));
    }

    #[test]
    fn test_wallet_can_afford_exact_balance() {
        let mut wallet = Wallet::new(TenantId::new("t"), "IDR");
        wallet.apply(dec!(500), Utc::now()).unwrap();
        assert!(wallet.can_afford(dec!(500)));
        assert!(!wallet.can_afford(dec!(500.01)));
    }

    #[test]
    fn test_wallet_apply_overflow_leaves_wallet_untouched() {
        let mut wallet = Wallet::new(TenantId::new("t"), "IDR");
        wallet.apply(dec!(10), Utc::now()).unwrap();
        let before = wallet.clone();

        assert!(wallet.apply(Decimal::MAX, Utc::now()).is_err());
        assert_eq!(wallet, before);
    }
}
