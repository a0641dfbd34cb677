use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{storage::StorageError, tournament_store::TournamentStore},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a durable store installed, reconnecting with backoff and flagging degraded mode meanwhile.
///
/// Saved tournaments are loaded into memory the first time a store comes up.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn TournamentStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;
    let mut loaded = false;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        state.storage().install(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        delay = INITIAL_DELAY;

        if !loaded {
            match state.manager().load_saved().await {
                Ok(_) => loaded = true,
                Err(err) => error!(error = %err, "failed to load saved tournaments"),
            }
        }

        while watch_health(&state, store.as_ref()).await {
            if !loaded {
                match state.manager().load_saved().await {
                    Ok(_) => loaded = true,
                    Err(err) => error!(error = %err, "failed to load saved tournaments"),
                }
            }
        }

        warn!("exhausted storage reconnect attempts; dropping the connection");
        state.storage().clear().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the store until a failed health check cannot be repaired in place.
///
/// Returns true after a successful in-place reconnect, false when the store should be replaced.
async fn watch_health(state: &SharedState, store: &dyn TournamentStore) -> bool {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.storage().update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                let mut reconnect_delay = INITIAL_DELAY;
                for attempt in 0..MAX_RECONNECT_ATTEMPTS {
                    match store.try_reconnect().await {
                        Ok(()) => {
                            info!(attempt, "storage reconnected after health check failure");
                            state.storage().update_degraded(false);
                            return true;
                        }
                        Err(reconnect_err) => {
                            if attempt == 0 {
                                warn!(
                                    attempt, error = %reconnect_err,
                                    "storage reconnect first attempt failed; entering degraded mode"
                                );
                                state.storage().update_degraded(true);
                            } else {
                                warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                            }
                            sleep(reconnect_delay).await;
                            reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                        }
                    }
                }
                return false;
            }
        }
    }
}
