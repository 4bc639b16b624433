//! Platform rate configuration
//!
//! Rates are integer basis points so every money flow stays in fixed-point
//! arithmetic. A configuration is validated once and then persisted with the
//! platform; it is never re-initialized.

use super::error::EngineError;
use serde::{Deserialize, Serialize};

/// One whole, expressed in basis points.
pub const BPS_SCALE: u32 = 10_000;

/// A fraction in `[0, 1)` expressed in basis points.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
#[serde(transparent)]
#[cbor(array)]
pub struct Rate(#[n(0)] u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    pub fn from_bps(bps: u32) -> Self {
        Self(bps)
    }
    pub fn bps(&self) -> u32 {
        self.0
    }
    /// `floor(amount * rate)`
    pub fn apply(&self, amount: u64) -> u64 {
        // rate < 1 keeps the quotient below `amount`
        ((amount as u128 * self.0 as u128) / BPS_SCALE as u128) as u64
    }
}

/// Who may resolve an overdue factored invoice as defaulted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    #[n(0)]
    OperatorOnly,
    #[n(1)]
    AnyoneWhenOverdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode)]
pub struct PlatformConfig {
    /// Withheld from the business at funding; collected when the debtor pays.
    #[n(0)]
    pub platform_fee_rate: Rate,
    /// Paid by the investor on top of the funding amount into the insurance pool.
    #[n(1)]
    pub insurance_fee_rate: Rate,
    /// Share of face value the business must escrow before factoring.
    #[n(2)]
    pub collateral_rate: Rate,
    /// Investor margin on top of the funded amount, carved out of the platform fee.
    #[n(3)]
    pub investor_yield_rate: Rate,
    #[n(4)]
    #[serde(default)]
    pub default_policy: DefaultPolicy,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform_fee_rate: Rate::from_bps(100),
            insurance_fee_rate: Rate::from_bps(50),
            collateral_rate: Rate::from_bps(4_000),
            investor_yield_rate: Rate::from_bps(50),
            default_policy: DefaultPolicy::OperatorOnly,
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let rates = [
            ("platform_fee_rate", self.platform_fee_rate),
            ("insurance_fee_rate", self.insurance_fee_rate),
            ("collateral_rate", self.collateral_rate),
            ("investor_yield_rate", self.investor_yield_rate),
        ];
        for (name, rate) in rates {
            if rate.bps() >= BPS_SCALE {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be below {BPS_SCALE} bps, got {}",
                    rate.bps()
                )));
            }
        }
        if self.platform_fee_rate.bps() + self.insurance_fee_rate.bps() >= BPS_SCALE {
            return Err(EngineError::InvalidConfig(
                "platform and insurance fees together must stay below 100%".into(),
            ));
        }
        // the debtor's payment has to cover the investor's return
        if self.investor_yield_rate > self.platform_fee_rate {
            return Err(EngineError::InvalidConfig(format!(
                "investor yield ({} bps) exceeds platform fee ({} bps)",
                self.investor_yield_rate.bps(),
                self.platform_fee_rate.bps()
            )));
        }
        Ok(())
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let cfg: Self =
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment, honouring a `.env` file.
    pub fn load() -> Result<Self, EngineError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay `FACTORING_*` variables onto the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let rate = |key: &str| -> Result<Option<Rate>, EngineError> {
            match lookup(key) {
                Some(val) => val
                    .trim()
                    .parse::<u32>()
                    .map(|bps| Some(Rate::from_bps(bps)))
                    .map_err(|e| EngineError::InvalidConfig(format!("{key}={val:?}: {e}"))),
                None => Ok(None),
            }
        };

        if let Some(r) = rate("FACTORING_PLATFORM_FEE_BPS")? {
            cfg.platform_fee_rate = r;
        }
        if let Some(r) = rate("FACTORING_INSURANCE_FEE_BPS")? {
            cfg.insurance_fee_rate = r;
        }
        if let Some(r) = rate("FACTORING_COLLATERAL_BPS")? {
            cfg.collateral_rate = r;
        }
        if let Some(r) = rate("FACTORING_INVESTOR_YIELD_BPS")? {
            cfg.investor_yield_rate = r;
        }
        if let Some(policy) = lookup("FACTORING_DEFAULT_POLICY") {
            cfg.default_policy = match policy.trim() {
                "operator_only" => DefaultPolicy::OperatorOnly,
                "anyone_when_overdue" => DefaultPolicy::AnyoneWhenOverdue,
                other => {
                    return Err(EngineError::InvalidConfig(format!(
                        "unknown default policy {other:?}"
                    )));
                }
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        assert!(PlatformConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_rate_of_one() {
        let cfg = PlatformConfig {
            collateral_rate: Rate::from_bps(BPS_SCALE),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_fees_summing_to_one() {
        let cfg = PlatformConfig {
            platform_fee_rate: Rate::from_bps(6_000),
            insurance_fee_rate: Rate::from_bps(4_000),
            investor_yield_rate: Rate::ZERO,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_yield_above_platform_fee() {
        let cfg = PlatformConfig {
            investor_yield_rate: Rate::from_bps(101),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FACTORING_COLLATERAL_BPS", "2500"),
            ("FACTORING_DEFAULT_POLICY", "anyone_when_overdue"),
        ]);
        let cfg = PlatformConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.collateral_rate, Rate::from_bps(2_500));
        assert_eq!(cfg.platform_fee_rate, Rate::from_bps(100));
        assert_eq!(cfg.default_policy, DefaultPolicy::AnyoneWhenOverdue);
    }

    #[test]
    fn env_rejects_garbage() {
        let res = PlatformConfig::from_lookup(|k| {
            (k == "FACTORING_PLATFORM_FEE_BPS").then(|| "one percent".to_string())
        });
        assert!(matches!(res, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn json_roundtrip_through_serde() {
        let raw = r#"{
            "platform_fee_rate": 200,
            "insurance_fee_rate": 100,
            "collateral_rate": 3000,
            "investor_yield_rate": 150
        }"#;
        let cfg = PlatformConfig::from_json(raw).unwrap();
        assert_eq!(cfg.platform_fee_rate.bps(), 200);
        assert_eq!(cfg.default_policy, DefaultPolicy::OperatorOnly);
    }
}
