//! Final state before shutdown: ends every open session and drains
//! whatever is left to send, without a full retry cycle. See
//! `original_source/openkit/core/communication/beacon_flush.py`.

use crate::error::AgentError;
use crate::sender::context::BeaconSendingContext;
use crate::sender::state::SenderState;

use super::terminal::TerminalState;

pub struct FlushState;

impl SenderState for FlushState {
    fn name(&self) -> &'static str {
        "flush"
    }

    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError> {
        for session in context.not_configured_sessions()? {
            context.mark_configured(&session)?;
        }

        for session in context.open_and_configured_sessions()? {
            session.end(None, false)?;
        }

        let mut too_many_requests = false;
        for session in context.finished_and_configured_sessions()? {
            if !too_many_requests && session.data_sending_allowed() {
                if let Some(response) = session.send_beacon(context.http_client().as_ref(), context)? {
                    too_many_requests = response.status_code == 429;
                }
            }
            session.clear_captured_data()?;
            context.remove_session(&session)?;
        }

        Ok(Some(Box::new(TerminalState)))
    }

    fn shutdown_state(&self) -> Box<dyn SenderState> {
        Box::new(TerminalState)
    }
}
