use std::path::PathBuf;
use std::sync::Arc;

use aera_core::platform::ConnectivitySignal;
use aera_core::ConnectivityTrigger;
use tokio::time::MissedTickBehavior;

use crate::commands::common::CliContext;
use crate::commands::status::describe_indicator;
use crate::commands::sync::describe_reconciliation;
use crate::error::CliError;

pub async fn run_watch(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;

    if let Some(reason) = replica.engine.remote().unavailable_reason() {
        return Err(CliError::Config(format!(
            "Cannot watch profile '{}': {reason}",
            context.profile_name
        )));
    }

    let owner_id = replica.session().await?.map(|session| session.user.id);
    let engine = Arc::new(replica.engine);

    let signal = ConnectivitySignal::new(false);
    let mut trigger = ConnectivityTrigger::new(Arc::clone(&engine), &signal);
    let interval = context.config.probe_interval();
    println!(
        "Watching Supabase reachability every {}s; press Ctrl-C to stop.",
        interval.as_secs()
    );

    let probe_engine = Arc::clone(&engine);
    let probe = async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconciled = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let online = probe_engine.remote().probe().await;
                    if online && !reconciled {
                        if let Some(owner_id) = owner_id.as_deref() {
                            let outcome = probe_engine.reconcile_on_start(owner_id).await?;
                            if let Some(line) = describe_reconciliation(&outcome) {
                                println!("{line}");
                            }
                        }
                        reconciled = true;
                    }
                    signal.set_online(online);
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
            }
        }
        // Closing the sender ends the trigger loop.
        drop(signal);
        Ok::<(), CliError>(())
    };

    let (trigger_result, probe_result) = tokio::join!(trigger.run(), probe);
    trigger_result?;
    probe_result?;

    println!("Stopped. Sync: {}", describe_indicator(engine.indicator().await));
    Ok(())
}
