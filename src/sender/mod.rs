//! Background thread that drives beacons from the cache to the wire. Wraps
//! the `SenderState` machine (`state`, `states`) around a shared
//! `BeaconSendingContext`. See
//! `original_source/openkit/core/beacon_sender.py` (`BeaconSender`).

pub mod context;
mod state;
mod states;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::http::HttpClient;
use crate::session::Session;
use crate::session::proxy::SessionRegistry;

pub use context::BeaconSendingContext;
pub use states::{CaptureOffState, CaptureOnState, FlushState, InitState, TerminalState};

/// Owns the context and the background thread that steps the sender's
/// state machine until it reaches `TerminalState`.
pub struct BeaconSender {
    context: Arc<BeaconSendingContext>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BeaconSender {
    pub fn new(http_client: Arc<dyn HttpClient>, server_config: Arc<Mutex<ServerConfig>>) -> Self {
        Self {
            context: Arc::new(BeaconSendingContext::new(http_client, server_config)),
            handle: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<BeaconSendingContext> {
        &self.context
    }

    pub fn add_session(&self, session: Arc<Session>) -> Result<(), AgentError> {
        self.context.add_session(session)
    }

    pub fn initialize(&self) -> Result<(), AgentError> {
        let context = Arc::clone(&self.context);
        let handle = std::thread::Builder::new()
            .name("beacon-sender".into())
            .spawn(move || {
                let mut current: Box<dyn state::SenderState> = Box::new(InitState::new());
                while !current.is_terminal() {
                    current = state::step(current, &context);
                }
                let _ = state::step(current, &context);
            })
            .map_err(AgentError::Io)?;
        *self.handle.lock()? = Some(handle);
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), AgentError> {
        self.context.request_shutdown();
        if let Some(handle) = self.handle.lock()?.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl SessionRegistry for BeaconSender {
    fn add_session(&self, session: Arc<Session>) {
        if let Err(err) = self.context.add_session(session) {
            tracing::warn!(%err, "failed to register session with sender");
        }
    }
}
