//! Walks two invoices through the platform: one repaid, one defaulted.
//!
//! Rates come from `FACTORING_*` variables or a `.env` file. Run with
//! `RUST_LOG=debug` to see rejected commands as well.

use anyhow::Context;
use chrono::TimeDelta;
use invoice_factoring::{
    FactoringEngine, Identity, InvoiceDraft, PlatformConfig, TimeStamp,
    calculator::FeeBreakdown,
    clock::{Clock, ManualClock},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PlatformConfig::load().context("Invalid platform configuration: ")?;
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("demo.db"))?);
    let clock = Arc::new(ManualClock::starting_at(&TimeStamp::new()));

    let operator = Identity::generate("op_")?;
    let business = Identity::generate("biz_")?;
    let investor = Identity::generate("inv_")?;
    let debtor = Identity::generate("debtor_")?;

    let engine = FactoringEngine::initialize(db, config, operator.clone(), clock.clone())?;
    let due = clock
        .now()
        .checked_add(TimeDelta::days(30))
        .context("due date out of range")?;

    let mut ids = vec![];
    for amount in [25_000, 40_000] {
        let draft = InvoiceDraft::new()
            .set_debtor(debtor.clone())
            .set_amount(amount)
            .set_due_date(due.clone());
        let id = engine.create_invoice(&business, draft)?.value;
        let fees = FeeBreakdown::compute(amount, engine.config())?;

        engine.deposit_collateral(&business, id, fees.collateral)?;
        engine.factor_invoice(&investor, id, fees.funding_required)?;
        ids.push((id, amount));
    }

    // the first debtor pays on time
    let (paid, amount) = ids[0];
    engine.pay_invoice(&debtor, paid, amount)?;

    // the second does not
    clock.advance(TimeDelta::days(31));
    let (defaulted, _) = ids[1];
    if let Err(err) = engine.handle_default(&investor, defaulted) {
        tracing::info!(%err, "only the operator may resolve defaults");
        engine.handle_default(&operator, defaulted)?;
    }

    let stats = engine.get_platform_stats()?;
    tracing::info!(
        volume = stats.total_volume,
        defaults = stats.total_defaults,
        pool = stats.insurance_pool,
        fees = stats.platform_fee_balance,
        business = engine.get_balance(&business)?,
        investor = engine.get_balance(&investor)?,
        "platform summary"
    );
    tracing::info!(events = engine.verify_event_log()?, "event log verified");

    Ok(())
}
