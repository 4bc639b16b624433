//! Fee and collateral arithmetic
use super::config::PlatformConfig;
use super::error::EngineError;

/// Every amount derived from an invoice's face value under one rate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub amount: u64,
    pub collateral: u64,
    pub platform_fee: u64,
    pub insurance_fee: u64,
    /// What the business receives when the invoice is factored.
    pub factor_amount: u64,
    /// What the investor must pay to factor: `factor_amount + insurance_fee`.
    pub funding_required: u64,
    pub investor_yield: u64,
    /// What the investor is owed at repayment: `factor_amount + investor_yield`.
    pub expected_return: u64,
}

impl FeeBreakdown {
    pub fn compute(amount: u64, config: &PlatformConfig) -> Result<Self, EngineError> {
        let collateral = config.collateral_rate.apply(amount);
        let platform_fee = config.platform_fee_rate.apply(amount);
        let insurance_fee = config.insurance_fee_rate.apply(amount);
        let investor_yield = config.investor_yield_rate.apply(amount);

        let factor_amount = amount - platform_fee;
        let funding_required = factor_amount
            .checked_add(insurance_fee)
            .ok_or(EngineError::Overflow)?;
        let expected_return = factor_amount
            .checked_add(investor_yield)
            .ok_or(EngineError::Overflow)?;

        Ok(Self {
            amount,
            collateral,
            platform_fee,
            insurance_fee,
            factor_amount,
            funding_required,
            investor_yield,
            expected_return,
        })
    }

    /// Retained by the platform out of the debtor's payment.
    pub fn platform_margin(&self) -> u64 {
        self.amount.saturating_sub(self.expected_return)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rate;

    fn config(platform: u32, insurance: u32, collateral: u32, yield_bps: u32) -> PlatformConfig {
        PlatformConfig {
            platform_fee_rate: Rate::from_bps(platform),
            insurance_fee_rate: Rate::from_bps(insurance),
            collateral_rate: Rate::from_bps(collateral),
            investor_yield_rate: Rate::from_bps(yield_bps),
            ..Default::default()
        }
    }

    #[test]
    fn thousand_unit_invoice() {
        let fees = FeeBreakdown::compute(1000, &config(100, 50, 4_000, 50)).unwrap();

        assert_eq!(fees.collateral, 400);
        assert_eq!(fees.platform_fee, 10);
        assert_eq!(fees.insurance_fee, 5);
        assert_eq!(fees.factor_amount, 990);
        assert_eq!(fees.funding_required, 995);
        assert_eq!(fees.expected_return, 995);
        assert_eq!(fees.platform_margin(), 5);
    }

    #[test]
    fn fractions_round_down() {
        let fees = FeeBreakdown::compute(1, &config(100, 50, 4_000, 50)).unwrap();
        assert_eq!(fees.collateral, 0);
        assert_eq!(fees.platform_fee, 0);
        assert_eq!(fees.factor_amount, 1);

        let fees = FeeBreakdown::compute(999, &config(100, 50, 4_000, 0)).unwrap();
        assert_eq!(fees.collateral, 399);
        assert_eq!(fees.platform_fee, 9);
        assert_eq!(fees.insurance_fee, 4);
    }

    #[test]
    fn large_amounts_do_not_overflow_the_product() {
        let fees = FeeBreakdown::compute(u64::MAX, &config(100, 50, 4_000, 50)).unwrap();
        assert!(fees.collateral < u64::MAX);
        assert_eq!(fees.factor_amount, u64::MAX - fees.platform_fee);
    }

    #[test]
    fn funding_overflow_is_reported() {
        // insurance larger than platform fee pushes funding above face value
        let res = FeeBreakdown::compute(u64::MAX, &config(0, 500, 0, 0));
        assert!(matches!(res, Err(EngineError::Overflow)));
    }
}
