//! Steady state while capturing is enabled: starts new sessions, drains
//! finished ones, and periodically flushes open ones. See
//! `original_source/openkit/core/communication/beacon_capture_on.py`.

use std::time::Duration;

use crate::error::AgentError;
use crate::http::StatusResponse;
use crate::sender::context::BeaconSendingContext;
use crate::sender::state::SenderState;

use super::capture_off::CaptureOffState;
use super::flush::FlushState;

pub struct CaptureOnState;

impl SenderState for CaptureOnState {
    fn name(&self) -> &'static str {
        "capture-on"
    }

    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError> {
        context.sleep(Duration::from_millis(1_000));

        if let Some(response) = self.send_new_session_requests(context)? {
            if response.status_code == 429 {
                return Ok(Some(Box::new(CaptureOffState::default())));
            }
        }

        let finished_response = self.send_finished_sessions(context)?;
        if matches!(&finished_response, Some(r) if r.status_code == 429) {
            return Ok(Some(Box::new(CaptureOffState::default())));
        }

        let open_response = self.send_open_sessions(context)?;

        let last_response = finished_response.or(open_response);
        if let Some(response) = &last_response {
            context.handle_response(Some(response))?;
            if !context.capture_on() {
                return Ok(Some(Box::new(CaptureOffState::default())));
            }
        }

        Ok(None)
    }

    fn shutdown_state(&self) -> Box<dyn SenderState> {
        Box::new(FlushState)
    }
}

impl CaptureOnState {
    fn send_new_session_requests(&self, context: &BeaconSendingContext) -> Result<Option<StatusResponse>, AgentError> {
        let mut last = None;
        for session in context.not_configured_sessions()? {
            let response = context.http_client().send_new_session_request(context)?;
            if !response.is_erroneous() {
                context.update_from(&response)?;
                context.mark_configured(&session)?;
            }
            let stop_early = response.status_code == 429;
            last = Some(response);
            if stop_early {
                break;
            }
        }
        Ok(last)
    }

    fn send_finished_sessions(&self, context: &BeaconSendingContext) -> Result<Option<StatusResponse>, AgentError> {
        let mut last = None;
        for session in context.finished_and_configured_sessions()? {
            if session.data_sending_allowed() {
                last = session.send_beacon(context.http_client().as_ref(), context)?;
            }
            context.remove_session(&session)?;
            session.clear_captured_data()?;
        }
        Ok(last)
    }

    fn send_open_sessions(&self, context: &BeaconSendingContext) -> Result<Option<StatusResponse>, AgentError> {
        let now = BeaconSendingContext::current_timestamp_ms();
        let should_send = now > context.last_open_session_beacon_send_time_ms() + context.send_interval_ms() as i64;
        if !should_send {
            return Ok(None);
        }

        let mut last = None;
        for session in context.open_and_configured_sessions()? {
            if session.data_sending_allowed() {
                last = session.send_beacon(context.http_client().as_ref(), context)?;
            } else {
                session.clear_captured_data()?;
            }
        }
        context.set_last_open_session_beacon_send_time_ms(now);
        Ok(last)
    }
}
