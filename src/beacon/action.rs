//! Recorded action and web-request spans, as handed to `Beacon::add_action`
//! and `Beacon::add_web_request`. See
//! `original_source/openkit/core/objects/base_action.py` and
//! `original_source/openkit/core/objects/web_request_tracer.py`.

use chrono::{DateTime, Utc};

/// A completed, timed user action within a session.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: i32,
    pub parent_action_id: i32,
    pub name: String,
    pub start_sequence_number: i32,
    pub end_sequence_number: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// A completed outbound web request span.
#[derive(Debug, Clone)]
pub struct WebRequestTracer {
    pub url: String,
    pub start_seq_no: i32,
    pub end_seq_no: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub response_code: Option<i32>,
    pub bytes_received: Option<i64>,
    pub bytes_sent: Option<i64>,
}
