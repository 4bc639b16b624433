//! Invoice lifecycle transitions
//!
//! Every transition here is a pure function over an [`Invoice`] and the
//! [`PlatformState`] aggregate. Work happens on copies which replace the
//! originals only once every check and every checked addition has passed, so a
//! failed call leaves both arguments untouched. Persisting the result is the
//! engine's job.
//!
//! ```text
//! Pending ──factor──▶ Factored ──pay──▶ Paid
//!    │                   │
//!    └──────default──────┴──────────▶ Defaulted
//! ```

use super::access::{AccessControl, Capability, PauseState};
use super::calculator::FeeBreakdown;
use super::config::PlatformConfig;
use super::error::EngineError;
use super::events::EventKind;
use super::invoice::{Identity, Invoice, InvoiceDraft, InvoiceStatus, TimeStamp};
use super::state::PlatformState;
use chrono::Utc;

/// Funds the engine now owes to a party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub to: Identity,
    pub amount: u64,
}

/// Side effects of one successful transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub invoice_id: Option<u64>,
    pub events: Vec<EventKind>,
    pub payouts: Vec<Payout>,
}

impl Transition {
    fn for_invoice(id: u64) -> Self {
        Self {
            invoice_id: Some(id),
            ..Default::default()
        }
    }
    fn emit(&mut self, kind: EventKind) {
        self.events.push(kind);
    }
    fn pay(&mut self, to: &Identity, amount: u64) {
        if amount > 0 {
            self.payouts.push(Payout {
                to: to.clone(),
                amount,
            });
        }
    }
}

pub struct StateMachine<'a> {
    config: &'a PlatformConfig,
    access: &'a AccessControl,
}

fn expect_status(
    invoice: &Invoice,
    allowed: &[InvoiceStatus],
    expected: &'static str,
) -> Result<(), EngineError> {
    if allowed.contains(&invoice.status) {
        Ok(())
    } else {
        Err(EngineError::InvalidState {
            id: invoice.id,
            status: invoice.status,
            expected,
        })
    }
}

fn add(a: u64, b: u64) -> Result<u64, EngineError> {
    a.checked_add(b).ok_or(EngineError::Overflow)
}

fn sub(a: u64, b: u64) -> Result<u64, EngineError> {
    a.checked_sub(b).ok_or(EngineError::Overflow)
}

// apply `f` to copies and swap them in only on success
fn commit<F>(
    invoice: &mut Invoice,
    state: &mut PlatformState,
    f: F,
) -> Result<Transition, EngineError>
where
    F: FnOnce(&mut Invoice, &mut PlatformState) -> Result<Transition, EngineError>,
{
    let mut next_invoice = invoice.clone();
    let mut next_state = state.clone();
    let transition = f(&mut next_invoice, &mut next_state)?;

    debug_assert!(
        next_invoice.status == invoice.status
            || invoice.status.can_transition_to(next_invoice.status)
    );

    *invoice = next_invoice;
    *state = next_state;
    Ok(transition)
}

impl<'a> StateMachine<'a> {
    pub fn new(config: &'a PlatformConfig, access: &'a AccessControl) -> Self {
        Self { config, access }
    }

    pub fn fees(&self, invoice: &Invoice) -> Result<FeeBreakdown, EngineError> {
        FeeBreakdown::compute(invoice.amount, self.config)
    }

    /// Allocates the next id and builds a pending invoice owned by `caller`.
    pub fn create(
        &self,
        state: &mut PlatformState,
        caller: &Identity,
        draft: &InvoiceDraft,
        now: &TimeStamp<Utc>,
    ) -> Result<(Invoice, Transition), EngineError> {
        state.pause.guard(Capability::CreateInvoice)?;
        self.access
            .authorize(caller, Capability::CreateInvoice, None)?;

        let mut next_state = state.clone();
        let id = next_state.next_invoice_id()?;
        let invoice = draft.finalise(id, caller.clone(), now.clone())?;

        let mut transition = Transition::for_invoice(id);
        transition.emit(EventKind::InvoiceCreated {
            business: invoice.business.clone(),
            debtor: invoice.debtor.clone(),
            amount: invoice.amount,
            due_date: invoice.due_date.clone(),
        });

        *state = next_state;
        Ok((invoice, transition))
    }

    pub fn deposit_collateral(
        &self,
        invoice: &mut Invoice,
        state: &mut PlatformState,
        payer: &Identity,
        value: u64,
    ) -> Result<Transition, EngineError> {
        state.pause.guard(Capability::DepositCollateral)?;
        self.access
            .authorize(payer, Capability::DepositCollateral, Some(&*invoice))?;
        expect_status(invoice, &[InvoiceStatus::Pending], "Pending")?;
        if invoice.collateral_deposited {
            return Err(EngineError::AlreadyCollateralized(invoice.id));
        }
        let fees = self.fees(invoice)?;
        if value != fees.collateral {
            return Err(EngineError::CollateralMismatch {
                expected: fees.collateral,
                got: value,
            });
        }

        commit(invoice, state, |inv, st| {
            inv.collateral_deposited = true;
            inv.escrowed_collateral = value;
            st.escrowed_collateral = add(st.escrowed_collateral, value)?;

            let mut transition = Transition::for_invoice(inv.id);
            transition.emit(EventKind::CollateralDeposited {
                business: inv.business.clone(),
                amount: value,
            });
            Ok(transition)
        })
    }

    /// At most one factoring per invoice: only a `Pending` invoice can be factored
    /// and success moves it out of `Pending`.
    pub fn factor(
        &self,
        invoice: &mut Invoice,
        state: &mut PlatformState,
        investor: &Identity,
        value: u64,
        now: &TimeStamp<Utc>,
    ) -> Result<Transition, EngineError> {
        state.pause.guard(Capability::FactorInvoice)?;
        self.access
            .authorize(investor, Capability::FactorInvoice, Some(&*invoice))?;
        expect_status(invoice, &[InvoiceStatus::Pending], "Pending")?;
        if !invoice.collateral_deposited {
            return Err(EngineError::CollateralRequired(invoice.id));
        }
        if invoice.is_overdue(now) {
            return Err(EngineError::Expired(invoice.id));
        }
        let fees = self.fees(invoice)?;
        if value != fees.funding_required {
            return Err(EngineError::AmountMismatch {
                expected: fees.funding_required,
                got: value,
            });
        }

        commit(invoice, state, |inv, st| {
            inv.status = InvoiceStatus::Factored;
            inv.investor = Some(investor.clone());
            inv.factor_amount = fees.factor_amount;
            inv.collateral_amount = inv.escrowed_collateral;
            inv.insurance_fee = fees.insurance_fee;
            inv.expected_return = fees.expected_return;

            st.insurance_pool.credit(fees.insurance_fee)?;
            st.total_volume = add(st.total_volume, fees.factor_amount)?;

            let mut transition = Transition::for_invoice(inv.id);
            transition.pay(&inv.business, fees.factor_amount);
            transition.emit(EventKind::InvoiceFactored {
                investor: investor.clone(),
                factor_amount: fees.factor_amount,
                collateral_amount: inv.collateral_amount,
                insurance_fee: fees.insurance_fee,
            });
            Ok(transition)
        })
    }

    pub fn pay(
        &self,
        invoice: &mut Invoice,
        state: &mut PlatformState,
        payer: &Identity,
        value: u64,
        now: &TimeStamp<Utc>,
    ) -> Result<Transition, EngineError> {
        state.pause.guard(Capability::PayInvoice)?;
        self.access
            .authorize(payer, Capability::PayInvoice, Some(&*invoice))?;
        expect_status(invoice, &[InvoiceStatus::Factored], "Factored")?;
        if value != invoice.amount {
            return Err(EngineError::AmountMismatch {
                expected: invoice.amount,
                got: value,
            });
        }
        let investor = factored_investor(invoice)?;

        commit(invoice, state, |inv, st| {
            let collateral = inv.escrowed_collateral;
            let margin = inv.amount.saturating_sub(inv.expected_return);

            inv.status = InvoiceStatus::Paid;
            inv.settled_at = Some(now.clone());
            inv.escrowed_collateral = 0;

            st.escrowed_collateral = sub(st.escrowed_collateral, collateral)?;
            st.platform_fees = add(st.platform_fees, margin)?;

            let mut transition = Transition::for_invoice(inv.id);
            transition.pay(&investor, inv.expected_return);
            transition.pay(&inv.business, collateral);
            transition.emit(EventKind::InvoicePaid {
                payer: payer.clone(),
                amount: value,
                investor_return: inv.expected_return,
                platform_fee: margin,
            });
            if collateral > 0 {
                transition.emit(EventKind::CollateralWithdrawn {
                    business: inv.business.clone(),
                    amount: collateral,
                });
            }
            Ok(transition)
        })
    }

    /// Resolves an overdue invoice as defaulted.
    ///
    /// For a factored invoice the investor's claim (`expected_return`) is covered
    /// from the escrowed collateral first and then from the insurance pool. An
    /// empty pool is not an error: whatever remains is recorded as shortfall.
    /// Collateral beyond the claim goes back to the business.
    ///
    /// An overdue invoice that was never factored simply expires into
    /// `Defaulted`, releasing any collateral to the business.
    pub fn handle_default(
        &self,
        invoice: &mut Invoice,
        state: &mut PlatformState,
        caller: &Identity,
        now: &TimeStamp<Utc>,
    ) -> Result<Transition, EngineError> {
        state.pause.guard(Capability::HandleDefault)?;
        self.access
            .authorize(caller, Capability::HandleDefault, Some(&*invoice))?;
        expect_status(
            invoice,
            &[InvoiceStatus::Pending, InvoiceStatus::Factored],
            "Pending or Factored",
        )?;
        if !invoice.is_overdue(now) {
            return Err(EngineError::NotYetDue(invoice.id));
        }
        let investor = match invoice.status {
            InvoiceStatus::Factored => Some(factored_investor(invoice)?),
            _ => None,
        };

        commit(invoice, state, |inv, st| {
            let previous = inv.status;
            let collateral = inv.escrowed_collateral;
            let mut transition = Transition::for_invoice(inv.id);
            transition.emit(EventKind::InvoiceDefaulted { previous });

            let mut surplus = collateral;
            if let Some(investor) = investor {
                let claimed = inv.expected_return;
                let from_collateral = collateral.min(claimed);
                let debit = st.insurance_pool.debit(claimed - from_collateral);
                surplus = collateral - from_collateral;

                transition.pay(&investor, from_collateral + debit.paid);
                transition.emit(EventKind::InsuranceClaim {
                    investor,
                    claimed,
                    from_collateral,
                    from_pool: debit.paid,
                    shortfall: debit.shortfall,
                });
            }
            if surplus > 0 {
                transition.pay(&inv.business, surplus);
                transition.emit(EventKind::CollateralWithdrawn {
                    business: inv.business.clone(),
                    amount: surplus,
                });
            }

            inv.status = InvoiceStatus::Defaulted;
            inv.settled_at = Some(now.clone());
            inv.escrowed_collateral = 0;
            st.escrowed_collateral = sub(st.escrowed_collateral, collateral)?;
            st.total_defaults = add(st.total_defaults, 1)?;

            Ok(transition)
        })
    }

    /// Flips the pause switch. Setting the current value is a no-op without an event.
    pub fn set_paused(
        &self,
        state: &mut PlatformState,
        caller: &Identity,
        paused: bool,
    ) -> Result<Transition, EngineError> {
        self.access
            .authorize(caller, Capability::Administer, None)?;

        let target = if paused {
            PauseState::Paused
        } else {
            PauseState::Active
        };
        let mut transition = Transition::default();
        if state.pause != target {
            state.pause = target;
            transition.emit(EventKind::PauseChanged { paused });
        }
        Ok(transition)
    }

    pub fn withdraw_platform_fees(
        &self,
        state: &mut PlatformState,
        caller: &Identity,
        amount: u64,
    ) -> Result<Transition, EngineError> {
        self.access
            .authorize(caller, Capability::Administer, None)?;
        if amount == 0 {
            return Err(EngineError::InvalidInput("withdrawal amount must be positive".into()));
        }
        if amount > state.platform_fees {
            return Err(EngineError::InsufficientPlatformFees {
                requested: amount,
                available: state.platform_fees,
            });
        }

        state.platform_fees -= amount;
        let mut transition = Transition::default();
        transition.pay(caller, amount);
        transition.emit(EventKind::PlatformFeesWithdrawn { amount });
        Ok(transition)
    }

    /// Authorizes a credit score write; the registry itself is storage.
    pub fn set_credit_score(
        &self,
        caller: &Identity,
        business: &Identity,
        score: u32,
    ) -> Result<Transition, EngineError> {
        self.access
            .authorize(caller, Capability::Administer, None)?;

        let mut transition = Transition::default();
        transition.emit(EventKind::CreditScoreSet {
            business: business.clone(),
            score,
        });
        Ok(transition)
    }
}

fn factored_investor(invoice: &Invoice) -> Result<Identity, EngineError> {
    // a factored record always carries its investor; anything else is corruption
    invoice
        .investor
        .clone()
        .ok_or_else(|| EngineError::Codec(format!("invoice {} has no investor", invoice.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultPolicy, Rate};
    use chrono::TimeDelta;

    struct Fixture {
        config: PlatformConfig,
        access: AccessControl,
        operator: Identity,
        business: Identity,
        investor: Identity,
        debtor: Identity,
        now: TimeStamp<Utc>,
    }

    impl Fixture {
        fn new(config: PlatformConfig) -> Self {
            let operator = Identity::generate("op_").unwrap();
            Self {
                access: AccessControl::new(operator.clone(), config.default_policy),
                config,
                operator,
                business: Identity::generate("biz_").unwrap(),
                investor: Identity::generate("inv_").unwrap(),
                debtor: Identity::generate("debtor_").unwrap(),
                now: TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap(),
            }
        }

        fn machine(&self) -> StateMachine<'_> {
            StateMachine::new(&self.config, &self.access)
        }

        fn after_due(&self) -> TimeStamp<Utc> {
            self.now.checked_add(TimeDelta::days(31)).unwrap()
        }

        fn pending(&self, state: &mut PlatformState, amount: u64) -> Invoice {
            let draft = InvoiceDraft::new()
                .set_debtor(self.debtor.clone())
                .set_amount(amount)
                .set_due_date(self.now.checked_add(TimeDelta::days(30)).unwrap());
            self.machine()
                .create(state, &self.business, &draft, &self.now)
                .unwrap()
                .0
        }

        fn factored(&self, state: &mut PlatformState, amount: u64) -> Invoice {
            let sm = self.machine();
            let mut invoice = self.pending(state, amount);
            let fees = sm.fees(&invoice).unwrap();
            sm.deposit_collateral(&mut invoice, state, &self.business, fees.collateral)
                .unwrap();
            sm.factor(&mut invoice, state, &self.investor, fees.funding_required, &self.now)
                .unwrap();
            invoice
        }
    }

    #[test]
    fn create_allocates_sequential_ids() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();

        assert_eq!(fx.pending(&mut state, 100).id, 1);
        assert_eq!(fx.pending(&mut state, 100).id, 2);
        assert_eq!(state.invoice_counter, 2);
    }

    #[test]
    fn rejected_create_does_not_burn_an_id() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let draft = InvoiceDraft::new()
            .set_debtor(fx.debtor.clone())
            .set_amount(0)
            .set_due_date(fx.after_due());

        assert!(fx.machine().create(&mut state, &fx.business, &draft, &fx.now).is_err());
        assert_eq!(state.invoice_counter, 0);
    }

    #[test]
    fn collateral_must_match_exactly() {
        let fx = Fixture::new(PlatformConfig::default());
        let sm = fx.machine();
        let mut state = PlatformState::default();
        let mut invoice = fx.pending(&mut state, 1_000);

        for wrong in [399, 401] {
            let err = sm
                .deposit_collateral(&mut invoice, &mut state, &fx.business, wrong)
                .unwrap_err();
            assert!(matches!(err, EngineError::CollateralMismatch { expected: 400, .. }));
        }
        assert!(!invoice.collateral_deposited);

        sm.deposit_collateral(&mut invoice, &mut state, &fx.business, 400).unwrap();
        assert_eq!(state.escrowed_collateral, 400);
        assert!(matches!(
            sm.deposit_collateral(&mut invoice, &mut state, &fx.business, 400),
            Err(EngineError::AlreadyCollateralized(1))
        ));
    }

    #[test]
    fn factor_requires_collateral_first() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.pending(&mut state, 1_000);

        let res = fx
            .machine()
            .factor(&mut invoice, &mut state, &fx.investor, 995, &fx.now);
        assert!(matches!(res, Err(EngineError::CollateralRequired(1))));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }

    #[test]
    fn factor_fixes_amounts_and_funds_pool() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let invoice = fx.factored(&mut state, 1_000);

        assert_eq!(invoice.status, InvoiceStatus::Factored);
        assert_eq!(invoice.investor.as_ref(), Some(&fx.investor));
        assert_eq!(invoice.factor_amount, 990);
        assert_eq!(invoice.collateral_amount, 400);
        assert_eq!(invoice.insurance_fee, 5);
        assert_eq!(state.insurance_pool.balance(), 5);
        assert_eq!(state.total_volume, 990);
    }

    #[test]
    fn second_factor_is_invalid_state() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);
        let before = (invoice.clone(), state.clone());

        let other = Identity::generate("inv_").unwrap();
        let res = fx.machine().factor(&mut invoice, &mut state, &other, 995, &fx.now);

        assert!(matches!(res, Err(EngineError::InvalidState { .. })));
        assert_eq!((invoice, state), before);
    }

    #[test]
    fn factoring_past_due_is_refused() {
        let fx = Fixture::new(PlatformConfig::default());
        let sm = fx.machine();
        let mut state = PlatformState::default();
        let mut invoice = fx.pending(&mut state, 1_000);
        sm.deposit_collateral(&mut invoice, &mut state, &fx.business, 400).unwrap();

        let res = sm.factor(&mut invoice, &mut state, &fx.investor, 995, &fx.after_due());
        assert!(matches!(res, Err(EngineError::Expired(1))));
    }

    #[test]
    fn pay_settles_investor_business_and_platform() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);

        let transition = fx
            .machine()
            .pay(&mut invoice, &mut state, &fx.debtor, 1_000, &fx.now)
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(
            transition.payouts,
            vec![
                Payout { to: fx.investor.clone(), amount: 995 },
                Payout { to: fx.business.clone(), amount: 400 },
            ]
        );
        assert_eq!(state.platform_fees, 5);
        assert_eq!(state.escrowed_collateral, 0);
    }

    #[test]
    fn partial_payment_is_rejected() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);

        let res = fx.machine().pay(&mut invoice, &mut state, &fx.debtor, 999, &fx.now);
        assert!(matches!(res, Err(EngineError::AmountMismatch { expected: 1_000, got: 999 })));
        assert_eq!(invoice.status, InvoiceStatus::Factored);
    }

    #[test]
    fn default_before_due_date_is_refused() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);

        let res = fx
            .machine()
            .handle_default(&mut invoice, &mut state, &fx.operator, &fx.now);
        assert!(matches!(res, Err(EngineError::NotYetDue(1))));
    }

    #[test]
    fn default_with_empty_pool_records_shortfall() {
        let config = PlatformConfig {
            insurance_fee_rate: Rate::ZERO,
            ..Default::default()
        };
        let fx = Fixture::new(config);
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);
        assert_eq!(state.insurance_pool.balance(), 0);

        let transition = fx
            .machine()
            .handle_default(&mut invoice, &mut state, &fx.operator, &fx.after_due())
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Defaulted);
        assert!(transition.events.contains(&EventKind::InsuranceClaim {
            investor: fx.investor.clone(),
            claimed: 995,
            from_collateral: 400,
            from_pool: 0,
            shortfall: 595,
        }));
        assert_eq!(transition.payouts, vec![Payout { to: fx.investor.clone(), amount: 400 }]);
    }

    #[test]
    fn surplus_collateral_returns_to_business() {
        let config = PlatformConfig {
            platform_fee_rate: Rate::from_bps(5_000),
            insurance_fee_rate: Rate::ZERO,
            collateral_rate: Rate::from_bps(9_000),
            investor_yield_rate: Rate::ZERO,
            default_policy: DefaultPolicy::AnyoneWhenOverdue,
        };
        let fx = Fixture::new(config);
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);

        let stranger = Identity::generate("anon_").unwrap();
        let transition = fx
            .machine()
            .handle_default(&mut invoice, &mut state, &stranger, &fx.after_due())
            .unwrap();

        // claim 500 fully covered by 900 collateral
        assert_eq!(
            transition.payouts,
            vec![
                Payout { to: fx.investor.clone(), amount: 500 },
                Payout { to: fx.business.clone(), amount: 400 },
            ]
        );
        assert_eq!(state.total_defaults, 1);
    }

    #[test]
    fn overdue_pending_invoice_expires_into_default() {
        let fx = Fixture::new(PlatformConfig::default());
        let sm = fx.machine();
        let mut state = PlatformState::default();
        let mut invoice = fx.pending(&mut state, 1_000);
        sm.deposit_collateral(&mut invoice, &mut state, &fx.business, 400).unwrap();

        let transition = sm
            .handle_default(&mut invoice, &mut state, &fx.operator, &fx.after_due())
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Defaulted);
        assert_eq!(transition.payouts, vec![Payout { to: fx.business.clone(), amount: 400 }]);
        assert!(!transition
            .events
            .iter()
            .any(|e| matches!(e, EventKind::InsuranceClaim { .. })));
    }

    #[test]
    fn operator_only_policy_blocks_strangers() {
        let fx = Fixture::new(PlatformConfig::default());
        let mut state = PlatformState::default();
        let mut invoice = fx.factored(&mut state, 1_000);

        let res = fx
            .machine()
            .handle_default(&mut invoice, &mut state, &fx.investor, &fx.after_due());
        assert!(matches!(res, Err(EngineError::Unauthorized { .. })));
    }

    #[test]
    fn withdrawal_limited_to_collected_fees() {
        let fx = Fixture::new(PlatformConfig::default());
        let sm = fx.machine();
        let mut state = PlatformState {
            platform_fees: 10,
            ..Default::default()
        };

        assert!(matches!(
            sm.withdraw_platform_fees(&mut state, &fx.operator, 11),
            Err(EngineError::InsufficientPlatformFees { requested: 11, available: 10 })
        ));
        assert!(sm.withdraw_platform_fees(&mut state, &fx.business, 5).is_err());

        let transition = sm.withdraw_platform_fees(&mut state, &fx.operator, 10).unwrap();
        assert_eq!(state.platform_fees, 0);
        assert_eq!(transition.payouts, vec![Payout { to: fx.operator.clone(), amount: 10 }]);
    }
}
