//! Coalesced token refresh.
//!
//! The first caller to ask for a refresh becomes the leader and performs the
//! provider round trip; callers arriving while it is in flight subscribe to
//! the leader's outcome instead of starting their own. The slot is reset
//! when the leader settles, including when the leader's future is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::error::GatewayError;

type Outcome = Result<String, Arc<GatewayError>>;
type Slot = Option<watch::Receiver<Option<Outcome>>>;

enum Turn {
    Leader(watch::Sender<Option<Outcome>>),
    Follower(watch::Receiver<Option<Outcome>>),
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    inflight: Mutex<Slot>,
}

/// Clears the in-flight slot when the leader finishes or is dropped.
struct ResetOnDrop<'a>(&'a Mutex<Slot>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `refresh` unless one is already in flight, then share its outcome.
    ///
    /// Every caller of one burst gets the same token, or a
    /// [`GatewayError::RefreshFailed`] wrapping the same error.
    pub(crate) async fn run<F, Fut>(&self, refresh: F) -> Result<String, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, GatewayError>>,
    {
        let turn = {
            let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(receiver) => Turn::Follower(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    *slot = Some(receiver);
                    Turn::Leader(sender)
                }
            }
        };

        let outcome = match turn {
            Turn::Leader(sender) => {
                let _reset = ResetOnDrop(&self.inflight);
                debug!("starting token refresh");
                let outcome: Outcome = refresh().await.map_err(Arc::new);
                sender.send_replace(Some(outcome.clone()));
                outcome
            }
            Turn::Follower(mut receiver) => {
                debug!("joining in-flight token refresh");
                match receiver.wait_for(Option::is_some).await {
                    Ok(settled) => (*settled).clone().unwrap_or_else(|| Err(abandoned())),
                    Err(_) => Err(abandoned()),
                }
            }
        };

        outcome.map_err(GatewayError::RefreshFailed)
    }
}

fn abandoned() -> Arc<GatewayError> {
    Arc::new(GatewayError::InvalidResponse(
        "token refresh was abandoned before it settled".to_string(),
    ))
}
