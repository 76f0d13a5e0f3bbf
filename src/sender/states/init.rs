//! First state the sender enters: keeps sending status requests until the
//! server answers, backing off along a fixed table of delays rather than
//! the generic doubling retry used elsewhere. See
//! `original_source/openkit/core/communication/beacon_init.py`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::AgentError;
use crate::sender::context::BeaconSendingContext;
use crate::sender::state::{
    send_status_request_with_retries, SenderState, INITIAL_RETRY_SLEEP_TIME_MS,
    MAX_INITIAL_STATUS_REQUEST_RETRIES,
};

use super::capture_off::CaptureOffState;
use super::capture_on::CaptureOnState;
use super::terminal::TerminalState;

const REINIT_DELAY_MILLISECONDS: [u64; 5] = [60_000, 300_000, 900_000, 3_600_000, 7_200_000];

pub struct InitState {
    reinit_delay_index: AtomicUsize,
}

impl InitState {
    pub fn new() -> Self {
        Self {
            reinit_delay_index: AtomicUsize::new(0),
        }
    }

    fn next_reinit_delay_ms(&self) -> u64 {
        let index = self.reinit_delay_index.load(Ordering::SeqCst);
        let delay = REINIT_DELAY_MILLISECONDS[index];
        let next_index = (index + 1).min(REINIT_DELAY_MILLISECONDS.len() - 1);
        self.reinit_delay_index.store(next_index, Ordering::SeqCst);
        delay
    }
}

impl Default for InitState {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderState for InitState {
    fn name(&self) -> &'static str {
        "init"
    }

    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError> {
        loop {
            let now = BeaconSendingContext::current_timestamp_ms();
            context.set_last_open_session_beacon_send_time_ms(now);
            context.set_last_status_check_time_ms(now);

            let response = send_status_request_with_retries(
                context,
                MAX_INITIAL_STATUS_REQUEST_RETRIES,
                INITIAL_RETRY_SLEEP_TIME_MS,
            );

            if context.shutdown_requested() {
                context.set_init_succeeded(false);
                return Ok(None);
            }

            if response.status_code <= 400 {
                context.handle_response(Some(&response))?;
                context.set_init_succeeded(true);
                let next: Box<dyn SenderState> = if context.capture_on() {
                    Box::new(CaptureOnState)
                } else {
                    Box::new(CaptureOffState::default())
                };
                return Ok(Some(next));
            }

            context.sleep(Duration::from_millis(self.next_reinit_delay_ms()));
        }
    }

    fn shutdown_state(&self) -> Box<dyn SenderState> {
        Box::new(TerminalState)
    }
}
