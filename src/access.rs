//! Capability checks and the global pause switch
use super::config::DefaultPolicy;
use super::error::EngineError;
use super::invoice::{Identity, Invoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub enum PauseState {
    #[default]
    #[n(0)]
    Active,
    #[n(1)]
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateInvoice,
    DepositCollateral,
    FactorInvoice,
    PayInvoice,
    HandleDefault,
    Administer,
}

impl Capability {
    pub fn action(&self) -> &'static str {
        match self {
            Capability::CreateInvoice => "create invoices",
            Capability::DepositCollateral => "deposit collateral",
            Capability::FactorInvoice => "factor invoices",
            Capability::PayInvoice => "pay invoices",
            Capability::HandleDefault => "resolve defaults",
            Capability::Administer => "administer the platform",
        }
    }
}

impl PauseState {
    /// While paused only default resolution and operator commands get through.
    pub fn guard(&self, capability: Capability) -> Result<(), EngineError> {
        match (self, capability) {
            (PauseState::Active, _) => Ok(()),
            (PauseState::Paused, Capability::HandleDefault | Capability::Administer) => Ok(()),
            (PauseState::Paused, _) => Err(EngineError::Paused),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    operator: Identity,
    default_policy: DefaultPolicy,
}

impl AccessControl {
    pub fn new(operator: Identity, default_policy: DefaultPolicy) -> Self {
        Self {
            operator,
            default_policy,
        }
    }

    pub fn operator(&self) -> &Identity {
        &self.operator
    }

    pub fn is_operator(&self, caller: &Identity) -> bool {
        *caller == self.operator
    }

    /// Single gate for every mutation. `invoice` is the record the capability
    /// is exercised on, when there is one.
    pub fn authorize(
        &self,
        caller: &Identity,
        capability: Capability,
        invoice: Option<&Invoice>,
    ) -> Result<(), EngineError> {
        let allowed = match (capability, invoice) {
            (Capability::CreateInvoice | Capability::PayInvoice, _) => true,
            (Capability::DepositCollateral, Some(inv)) => inv.business == *caller,
            (Capability::FactorInvoice, Some(inv)) => {
                if inv.business == *caller {
                    return Err(EngineError::SelfDealing);
                }
                true
            }
            (Capability::HandleDefault, _) => match self.default_policy {
                DefaultPolicy::OperatorOnly => self.is_operator(caller),
                DefaultPolicy::AnyoneWhenOverdue => true,
            },
            (Capability::Administer, _) => self.is_operator(caller),
            (Capability::DepositCollateral | Capability::FactorInvoice, None) => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                caller: caller.to_string(),
                action: capability.action(),
            })
        }
    }
}
