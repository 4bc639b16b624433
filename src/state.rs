//! Platform-wide aggregate and its read-only projection
use super::access::PauseState;
use super::config::{PlatformConfig, Rate};
use super::error::EngineError;
use super::events::GENESIS_HASH;
use super::pool::InsurancePool;

/// Every process-wide mutable value. Persisted under a single key so that
/// all updates to it are serialized by the storage transaction.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PlatformState {
    #[n(0)]
    pub invoice_counter: u64, // last allocated invoice id
    #[n(1)]
    pub insurance_pool: InsurancePool,
    #[n(2)]
    pub platform_fees: u64,
    #[n(3)]
    pub escrowed_collateral: u64,
    #[n(4)]
    pub total_volume: u64,
    #[n(5)]
    pub total_defaults: u64,
    #[n(6)]
    pub pause: PauseState,
    #[n(7)]
    pub event_seq: u64,
    #[n(8)]
    pub event_head: String,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            invoice_counter: 0,
            insurance_pool: InsurancePool::default(),
            platform_fees: 0,
            escrowed_collateral: 0,
            total_volume: 0,
            total_defaults: 0,
            pause: PauseState::Active,
            event_seq: 0,
            event_head: GENESIS_HASH.to_string(),
        }
    }
}

impl PlatformState {
    pub fn next_invoice_id(&mut self) -> Result<u64, EngineError> {
        self.invoice_counter = self
            .invoice_counter
            .checked_add(1)
            .ok_or(EngineError::Overflow)?;
        Ok(self.invoice_counter)
    }

    pub fn stats(&self, config: &PlatformConfig) -> PlatformStats {
        PlatformStats {
            invoice_counter: self.invoice_counter,
            insurance_pool: self.insurance_pool.balance(),
            platform_fee_balance: self.platform_fees,
            escrowed_collateral: self.escrowed_collateral,
            total_volume: self.total_volume,
            total_defaults: self.total_defaults,
            platform_fee_rate: config.platform_fee_rate,
            insurance_fee_rate: config.insurance_fee_rate,
            collateral_rate: config.collateral_rate,
            investor_yield_rate: config.investor_yield_rate,
            paused: self.pause == PauseState::Paused,
            event_count: self.event_seq,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformStats {
    pub invoice_counter: u64,
    pub insurance_pool: u64,
    pub platform_fee_balance: u64,
    pub escrowed_collateral: u64,
    pub total_volume: u64,
    pub total_defaults: u64,
    pub platform_fee_rate: Rate,
    pub insurance_fee_rate: Rate,
    pub collateral_rate: Rate,
    pub investor_yield_rate: Rate,
    pub paused: bool,
    pub event_count: u64,
}
