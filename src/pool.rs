//! Shared insurance reserve
use super::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct InsurancePool {
    #[n(0)]
    balance: u64,
}

/// Result of a payout request against the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDebit {
    pub paid: u64,
    pub shortfall: u64,
}

impl InsurancePool {
    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn credit(&mut self, amount: u64) -> Result<(), EngineError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(EngineError::Overflow)?;
        Ok(())
    }

    /// Pays out as much of `amount` as the balance allows. Never fails.
    pub fn debit(&mut self, amount: u64) -> PoolDebit {
        let paid = amount.min(self.balance);
        self.balance -= paid;
        PoolDebit {
            paid,
            shortfall: amount - paid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_on_empty_pool_reports_full_shortfall() {
        let mut pool = InsurancePool::default();
        let debit = pool.debit(595);
        assert_eq!(debit, PoolDebit { paid: 0, shortfall: 595 });
        assert_eq!(pool.balance(), 0);
    }

    #[test]
    fn debit_is_capped_at_balance() {
        let mut pool = InsurancePool::default();
        pool.credit(5).unwrap();
        pool.credit(5).unwrap();

        assert_eq!(pool.debit(3), PoolDebit { paid: 3, shortfall: 0 });
        assert_eq!(pool.debit(20), PoolDebit { paid: 7, shortfall: 13 });
        assert_eq!(pool.balance(), 0);
    }

    #[test]
    fn credit_overflow_leaves_balance() {
        let mut pool = InsurancePool::default();
        pool.credit(u64::MAX).unwrap();
        assert!(pool.credit(1).is_err());
        assert_eq!(pool.balance(), u64::MAX);
    }
}
