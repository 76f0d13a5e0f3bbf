//! The cooperative state machine the sender thread drives. Every state is a
//! small type implementing `SenderState`; `step` is the dispatcher that
//! drives one transition. See `original_source/openkit/core/communication/
//! beacon_abstract.py` (`AbstractBeaconSendingState.execute`).

use std::time::Duration;

use crate::error::AgentError;
use crate::http::StatusResponse;

use super::context::BeaconSendingContext;

pub(crate) const MAX_INITIAL_STATUS_REQUEST_RETRIES: u32 = 5;
pub(crate) const INITIAL_RETRY_SLEEP_TIME_MS: u64 = 1_000;

/// One state in the beacon-sending state machine.
pub trait SenderState: Send {
    fn name(&self) -> &'static str;

    /// Whether the machine should stop once it reaches this state.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Runs this state's work and returns the next state, or `None` to stay
    /// here (the machine re-runs the same state on its next tick).
    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError>;

    /// The state to fall back to if a shutdown is requested while this state
    /// is current, or if `do_execute` itself errors out.
    fn shutdown_state(&self) -> Box<dyn SenderState>;
}

/// Drives exactly one transition: runs `state`, falls back to its shutdown
/// state on error or on a pending shutdown request, otherwise advances (or
/// stays put, if `do_execute` returned `None`).
pub fn step(state: Box<dyn SenderState>, context: &BeaconSendingContext) -> Box<dyn SenderState> {
    match state.do_execute(context) {
        Ok(next) => {
            if context.shutdown_requested() {
                return state.shutdown_state();
            }
            next.unwrap_or(state)
        }
        Err(err) => {
            tracing::warn!(state = state.name(), %err, "sender state failed, shutting down");
            context.request_shutdown();
            state.shutdown_state()
        }
    }
}

/// Sends a status request, retrying on transient failure with a sleep that
/// doubles each attempt. Used by the init and capture-off states, which
/// differ only in how many retries they allow and how long the first sleep
/// is. See `original_source/openkit/core/communication/state_utils.py`
/// (`send_status_request`).
pub(crate) fn send_status_request_with_retries(
    context: &BeaconSendingContext,
    num_retries: u32,
    initial_retry_sleep_ms: u64,
) -> StatusResponse {
    let mut retries = 0;
    let mut sleep_ms = initial_retry_sleep_ms;
    loop {
        let response = match context.http_client().send_status_request(context) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%err, retries, "status request failed");
                StatusResponse::unknown_error()
            }
        };

        if response.status_code <= 400
            || response.status_code == 429
            || retries >= num_retries
            || context.shutdown_requested()
        {
            return response;
        }

        context.sleep(Duration::from_millis(sleep_ms));
        sleep_ms *= 2;
        retries += 1;
    }
}
