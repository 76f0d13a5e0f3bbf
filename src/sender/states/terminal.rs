//! Absorbing state: once reached the sender thread stops. See
//! `original_source/openkit/core/communication/beacon_terminal.py`.

use crate::error::AgentError;
use crate::sender::context::BeaconSendingContext;
use crate::sender::state::SenderState;

pub struct TerminalState;

impl SenderState for TerminalState {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn do_execute(&self, context: &BeaconSendingContext) -> Result<Option<Box<dyn SenderState>>, AgentError> {
        context.request_shutdown();
        Ok(None)
    }

    fn shutdown_state(&self) -> Box<dyn SenderState> {
        Box::new(TerminalState)
    }
}
