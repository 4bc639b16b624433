//! Command and query surface of the settlement engine
use super::access::AccessControl;
use super::clock::Clock;
use super::config::PlatformConfig;
use super::error::EngineError;
use super::events::{Event, EventKind, verify_chain};
use super::invoice::{Identity, Invoice, InvoiceDraft, TimeStamp};
use super::ledger::{InvoiceLedger, TxResult, abort, decode, encode};
use super::lifecycle::{Payout, StateMachine, Transition};
use super::registry::CreditRegistry;
use super::state::{PlatformState, PlatformStats};
use super::utils::{u64_from_key, u64_key};
use chrono::Utc;
use sled::transaction::{TransactionError, TransactionalTree, Transactional};
use sled::{Db, Tree};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PLATFORM_KEY: &[u8] = b"platform";
const CONFIG_KEY: &[u8] = b"config";
const OPERATOR_KEY: &[u8] = b"operator";

/// The result of a committed command together with the events it appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<Event>,
}

pub struct FactoringEngine {
    instance: Arc<Db>,
    ledger: InvoiceLedger,
    registry: CreditRegistry,
    platform: Tree,
    events: Tree,
    balances: Tree,
    config: PlatformConfig,
    access: AccessControl,
    clock: Arc<dyn Clock>,
}

impl FactoringEngine {
    /// Set up a fresh platform. Rates are fixed from here on; a second call on
    /// the same database fails with [`EngineError::AlreadyInitialized`].
    pub fn initialize(
        instance: Arc<Db>,
        config: PlatformConfig,
        operator: Identity,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let platform = instance.open_tree("platform")?;
        let config_cbor = minicbor::to_vec(&config)?;
        let operator_cbor = minicbor::to_vec(&operator)?;
        let state_cbor = minicbor::to_vec(&PlatformState::default())?;

        platform.transaction(|tx| -> TxResult<()> {
            if tx.get(CONFIG_KEY)?.is_some() {
                return Err(abort(EngineError::AlreadyInitialized));
            }
            tx.insert(CONFIG_KEY, config_cbor.clone())?;
            tx.insert(OPERATOR_KEY, operator_cbor.clone())?;
            tx.insert(PLATFORM_KEY, state_cbor.clone())?;
            Ok(())
        })?;

        info!(
            operator = %operator,
            platform_fee_bps = config.platform_fee_rate.bps(),
            insurance_fee_bps = config.insurance_fee_rate.bps(),
            collateral_bps = config.collateral_rate.bps(),
            investor_yield_bps = config.investor_yield_rate.bps(),
            "platform initialized"
        );

        Self::assemble(instance, platform, config, operator, clock)
    }

    /// Reopen a platform previously set up with [`FactoringEngine::initialize`].
    pub fn open(instance: Arc<Db>, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let platform = instance.open_tree("platform")?;
        let config: PlatformConfig = match platform.get(CONFIG_KEY)? {
            Some(bytes) => minicbor::decode(&bytes)?,
            None => return Err(EngineError::NotInitialized),
        };
        let operator: Identity = match platform.get(OPERATOR_KEY)? {
            Some(bytes) => minicbor::decode(&bytes)?,
            None => return Err(EngineError::NotInitialized),
        };
        debug!(operator = %operator, "platform reopened");

        Self::assemble(instance, platform, config, operator, clock)
    }

    fn assemble(
        instance: Arc<Db>,
        platform: Tree,
        config: PlatformConfig,
        operator: Identity,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            ledger: InvoiceLedger::open(&instance)?,
            registry: CreditRegistry::open(&instance)?,
            events: instance.open_tree("events")?,
            balances: instance.open_tree("balances")?,
            access: AccessControl::new(operator, config.default_policy),
            platform,
            config,
            clock,
            instance,
        })
    }

    fn machine(&self) -> StateMachine<'_> {
        StateMachine::new(&self.config, &self.access)
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn operator(&self) -> &Identity {
        self.access.operator()
    }

    pub fn flush(&self) -> Result<usize, EngineError> {
        Ok(self.instance.flush()?)
    }

    // COMMANDS

    /// Register a new invoice owned by `caller`.
    pub fn create_invoice(
        &self,
        caller: &Identity,
        draft: InvoiceDraft,
    ) -> Result<Outcome<u64>, EngineError> {
        let now = self.clock.now();
        let machine = self.machine();

        let result = (
            self.ledger.invoices(),
            self.ledger.by_business(),
            &self.platform,
            &self.events,
        )
            .transaction(|(invoices, by_business, platform, events)| -> TxResult<(u64, Vec<Event>)> {
                let mut state = load_state_tx(platform)?;
                let (invoice, transition) = machine
                    .create(&mut state, caller, &draft, &now)
                    .map_err(abort)?;

                InvoiceLedger::store_tx(invoices, &invoice)?;
                InvoiceLedger::index_tx(by_business, &invoice.business, invoice.id)?;
                let sealed = seal_events_tx(events, &mut state, caller, &now, &transition)?;
                store_state_tx(platform, &state)?;

                Ok((invoice.id, sealed))
            });

        let (id, events) = finish("create_invoice", None, result)?;
        log_committed(&events);
        Ok(Outcome { value: id, events })
    }

    /// Escrow the business's collateral. `value` must equal the computed collateral.
    pub fn deposit_collateral(
        &self,
        caller: &Identity,
        id: u64,
        value: u64,
    ) -> Result<Outcome<()>, EngineError> {
        self.run_transition("deposit_collateral", caller, id, |sm, invoice, state, _| {
            sm.deposit_collateral(invoice, state, caller, value)
        })
    }

    /// Fund a pending invoice. `value` must equal `factor_amount + insurance_fee`.
    pub fn factor_invoice(
        &self,
        caller: &Identity,
        id: u64,
        value: u64,
    ) -> Result<Outcome<()>, EngineError> {
        self.run_transition("factor_invoice", caller, id, |sm, invoice, state, now| {
            sm.factor(invoice, state, caller, value, now)
        })
    }

    /// Settle a factored invoice with exactly its face value.
    pub fn pay_invoice(
        &self,
        caller: &Identity,
        id: u64,
        value: u64,
    ) -> Result<Outcome<()>, EngineError> {
        self.run_transition("pay_invoice", caller, id, |sm, invoice, state, now| {
            sm.pay(invoice, state, caller, value, now)
        })
    }

    /// Resolve an overdue invoice. Available while paused.
    pub fn handle_default(&self, caller: &Identity, id: u64) -> Result<Outcome<()>, EngineError> {
        self.run_transition("handle_default", caller, id, |sm, invoice, state, now| {
            sm.handle_default(invoice, state, caller, now)
        })
    }

    pub fn pause(&self, caller: &Identity) -> Result<Outcome<()>, EngineError> {
        self.run_platform("pause", caller, |sm, state| sm.set_paused(state, caller, true))
    }

    pub fn unpause(&self, caller: &Identity) -> Result<Outcome<()>, EngineError> {
        self.run_platform("unpause", caller, |sm, state| sm.set_paused(state, caller, false))
    }

    /// Move collected platform fees to the operator's payout balance.
    pub fn withdraw_platform_fees(
        &self,
        caller: &Identity,
        amount: u64,
    ) -> Result<Outcome<()>, EngineError> {
        self.run_platform("withdraw_platform_fees", caller, |sm, state| {
            sm.withdraw_platform_fees(state, caller, amount)
        })
    }

    pub fn set_credit_score(
        &self,
        caller: &Identity,
        business: &Identity,
        score: u32,
    ) -> Result<Outcome<()>, EngineError> {
        let now = self.clock.now();
        let machine = self.machine();

        let result = (self.registry.tree(), &self.platform, &self.events).transaction(
            |(scores, platform, events)| -> TxResult<Vec<Event>> {
                let mut state = load_state_tx(platform)?;
                let transition = machine
                    .set_credit_score(caller, business, score)
                    .map_err(abort)?;

                CreditRegistry::set_score_tx(scores, business, score)?;
                let sealed = seal_events_tx(events, &mut state, caller, &now, &transition)?;
                store_state_tx(platform, &state)?;
                Ok(sealed)
            },
        );

        let events = finish("set_credit_score", None, result)?;
        log_committed(&events);
        Ok(Outcome { value: (), events })
    }

    // Read current invoice and platform state, apply one lifecycle transition
    // and write everything back inside a single transaction. A concurrent writer
    // to any of the same keys forces a retry against the fresh values.
    fn run_transition<F>(
        &self,
        command: &'static str,
        caller: &Identity,
        id: u64,
        apply: F,
    ) -> Result<Outcome<()>, EngineError>
    where
        F: Fn(
            &StateMachine<'_>,
            &mut Invoice,
            &mut PlatformState,
            &TimeStamp<Utc>,
        ) -> Result<Transition, EngineError>,
    {
        let now = self.clock.now();
        let machine = self.machine();

        let result = (
            self.ledger.invoices(),
            self.ledger.by_investor(),
            &self.platform,
            &self.events,
            &self.balances,
        )
            .transaction(
                |(invoices, by_investor, platform, events, balances)| -> TxResult<Vec<Event>> {
                    let mut invoice = InvoiceLedger::load_tx(invoices, id)?;
                    let mut state = load_state_tx(platform)?;
                    let had_investor = invoice.investor.is_some();

                    let transition =
                        apply(&machine, &mut invoice, &mut state, &now).map_err(abort)?;

                    InvoiceLedger::store_tx(invoices, &invoice)?;
                    if let (false, Some(investor)) = (had_investor, &invoice.investor) {
                        InvoiceLedger::index_tx(by_investor, investor, id)?;
                    }
                    credit_payouts_tx(balances, &transition.payouts)?;
                    let sealed = seal_events_tx(events, &mut state, caller, &now, &transition)?;
                    store_state_tx(platform, &state)?;
                    Ok(sealed)
                },
            );

        let events = finish(command, Some(id), result)?;
        log_committed(&events);
        Ok(Outcome { value: (), events })
    }

    fn run_platform<F>(
        &self,
        command: &'static str,
        caller: &Identity,
        apply: F,
    ) -> Result<Outcome<()>, EngineError>
    where
        F: Fn(&StateMachine<'_>, &mut PlatformState) -> Result<Transition, EngineError>,
    {
        let now = self.clock.now();
        let machine = self.machine();

        let result = (&self.platform, &self.events, &self.balances).transaction(
            |(platform, events, balances)| -> TxResult<Vec<Event>> {
                let mut state = load_state_tx(platform)?;
                let transition = apply(&machine, &mut state).map_err(abort)?;

                credit_payouts_tx(balances, &transition.payouts)?;
                let sealed = seal_events_tx(events, &mut state, caller, &now, &transition)?;
                store_state_tx(platform, &state)?;
                Ok(sealed)
            },
        );

        let events = finish(command, None, result)?;
        log_committed(&events);
        Ok(Outcome { value: (), events })
    }

    // QUERIES

    pub fn get_invoice(&self, id: u64) -> Result<Invoice, EngineError> {
        self.ledger.get(id)
    }

    pub fn get_platform_stats(&self) -> Result<PlatformStats, EngineError> {
        Ok(self.load_state()?.stats(&self.config))
    }

    pub fn get_business_invoices(&self, business: &Identity) -> Result<Vec<u64>, EngineError> {
        self.ledger.list_by_business(business)
    }

    pub fn get_investor_invoices(&self, investor: &Identity) -> Result<Vec<u64>, EngineError> {
        self.ledger.list_by_investor(investor)
    }

    pub fn get_credit_score(&self, business: &Identity) -> Result<Option<u32>, EngineError> {
        self.registry.get_score(business)
    }

    /// Total settled to `party` so far: funding, returns, released collateral
    /// and withdrawn fees.
    pub fn get_balance(&self, party: &Identity) -> Result<u64, EngineError> {
        match self.balances.get(party.as_str())? {
            Some(bytes) => u64_from_key(&bytes)
                .ok_or_else(|| EngineError::Codec("malformed balance".into())),
            None => Ok(0),
        }
    }

    /// Events with `seq >= from`, in order.
    pub fn events_since(&self, from: u64) -> Result<Vec<Event>, EngineError> {
        let mut out = vec![];
        for entry in self.events.range(u64_key(from)..) {
            let (_, bytes) = entry?;
            out.push(minicbor::decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn invoice_history(&self, id: u64) -> Result<Vec<Event>, EngineError> {
        Ok(self
            .events_since(1)?
            .into_iter()
            .filter(|e| e.invoice_id == Some(id))
            .collect())
    }

    /// Recompute every hash link in the log and check it ends at the recorded head.
    /// Returns the number of events checked.
    pub fn verify_event_log(&self) -> Result<u64, EngineError> {
        let events = self.events_since(1)?;
        let head = verify_chain(&events)?;
        let state = self.load_state()?;
        if head != state.event_head || events.len() as u64 != state.event_seq {
            return Err(EngineError::CorruptEventLog(state.event_seq));
        }
        Ok(state.event_seq)
    }

    fn load_state(&self) -> Result<PlatformState, EngineError> {
        match self.platform.get(PLATFORM_KEY)? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(EngineError::NotInitialized),
        }
    }
}

fn finish<T>(
    command: &'static str,
    invoice_id: Option<u64>,
    result: Result<T, TransactionError<EngineError>>,
) -> Result<T, EngineError> {
    result.map_err(|err| {
        let err = EngineError::from(err);
        debug!(command, invoice_id, error = %err, "command rejected");
        err
    })
}

fn log_committed(events: &[Event]) {
    for event in events {
        match &event.kind {
            EventKind::InsuranceClaim { shortfall, .. } if *shortfall > 0 => warn!(
                seq = event.seq,
                invoice_id = event.invoice_id,
                shortfall = *shortfall,
                "insurance pool could not cover default"
            ),
            _ => {}
        }
        info!(
            seq = event.seq,
            invoice_id = event.invoice_id,
            actor = %event.actor,
            kind = event.kind.name(),
            "event recorded"
        );
    }
}

fn load_state_tx(platform: &TransactionalTree) -> TxResult<PlatformState> {
    match platform.get(PLATFORM_KEY)? {
        Some(bytes) => decode(&bytes),
        None => Err(abort(EngineError::NotInitialized)),
    }
}

fn store_state_tx(platform: &TransactionalTree, state: &PlatformState) -> TxResult<()> {
    platform.insert(PLATFORM_KEY, encode(state)?)?;
    Ok(())
}

// Several payouts in one transition may target the same party; reads inside the
// transaction observe earlier writes.
fn credit_payouts_tx(balances: &TransactionalTree, payouts: &[Payout]) -> TxResult<()> {
    for payout in payouts {
        let key = payout.to.as_str();
        let current = match balances.get(key)? {
            Some(bytes) => u64_from_key(&bytes)
                .ok_or_else(|| abort(EngineError::Codec("malformed balance".into())))?,
            None => 0,
        };
        let next = current
            .checked_add(payout.amount)
            .ok_or_else(|| abort(EngineError::Overflow))?;
        balances.insert(key, u64_key(next).to_vec())?;
    }
    Ok(())
}

fn seal_events_tx(
    events: &TransactionalTree,
    state: &mut PlatformState,
    actor: &Identity,
    now: &TimeStamp<Utc>,
    transition: &Transition,
) -> TxResult<Vec<Event>> {
    let mut sealed = Vec::with_capacity(transition.events.len());
    for kind in &transition.events {
        let seq = state
            .event_seq
            .checked_add(1)
            .ok_or_else(|| abort(EngineError::Overflow))?;
        let event = Event::new(
            seq,
            transition.invoice_id,
            actor.clone(),
            now.clone(),
            kind.clone(),
            state.event_head.clone(),
        );
        let (hash, cbor) = event.build().map_err(abort)?;
        events.insert(u64_key(seq).to_vec(), cbor)?;
        state.event_seq = seq;
        state.event_head = hash;
        sealed.push(event);
    }
    Ok(sealed)
}
