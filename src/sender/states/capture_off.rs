//! Entered once the server tells us to stop capturing: clears whatever is
//! buffered and polls status on a long interval until capture is re-enabled.
//! See `original_source/openkit/core/communication/beacon_capture_off.py`.

use std::time::Duration;

use crate::error::AgentError;
use crate::sender::context::BeaconSendingContext;
use crate::sender::state::{send_status_request_with_retries, SenderState};

use super::capture_on::CaptureOnState;
use super::flush::FlushState;

const STATUS_CHECK_INTERVAL_MS: u64 = 2 * 60 * 60 * 1000;
const STATUS_REQUEST_RETRIES: u32 = 5;
const INITIAL_RETRY_SLEEP_TIME_MS: u64 = 1_000;
const REDUCED_CHECK_INTERVAL_MS: u64 = 10 * 60 * 1000;

pub struct CaptureOffState {
    sleep_time_ms: u64,
}

impl CaptureOffState {
    pub fn with_sleep_time_ms(sleep_time_ms: u64) -> Self {
        Self { sleep_time_ms }
    }
}

impl Default for CaptureOffState {
    fn default() -> Self {
        Self::with_sleep_time_ms(STATUS_CHECK_INTERVAL_MS)
    }
}

impl SenderState for CaptureOffState {
    fn name(&self) -> &'static str {
        "capture-off"
    }

    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError> {
        context.disable_capture()?;
        context.clear_all_session_data()?;

        let current_time = BeaconSendingContext::current_timestamp_ms();
        let delta = if self.sleep_time_ms > 0 {
            self.sleep_time_ms as i64
        } else {
            STATUS_CHECK_INTERVAL_MS as i64 - (current_time - context.last_status_check_time_ms())
        };
        if delta > 0 && !context.shutdown_requested() {
            context.sleep(Duration::from_millis(delta as u64));
        }

        let response = send_status_request_with_retries(context, STATUS_REQUEST_RETRIES, INITIAL_RETRY_SLEEP_TIME_MS);
        context.set_last_status_check_time_ms(current_time);

        context.handle_response(Some(&response))?;
        if response.is_erroneous() {
            return Ok(Some(Box::new(CaptureOffState::with_sleep_time_ms(REDUCED_CHECK_INTERVAL_MS))));
        }
        if context.capture_on() {
            return Ok(Some(Box::new(CaptureOnState)));
        }
        Ok(None)
    }

    fn shutdown_state(&self) -> Box<dyn SenderState> {
        Box::new(FlushState)
    }
}
