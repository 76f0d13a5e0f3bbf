//! Default `HttpClient` implementation backed by a blocking `reqwest`
//! client. Grounded in `rerun-io-rerun/crates/re_analytics/src/pipeline.rs`'s
//! `PostHogClient`: a blocking client with fixed timeouts wrapped behind a
//! thin send-and-classify method.

use std::time::Duration;

use reqwest::blocking::Client;

use super::{AdditionalQueryParameters, HttpClient, RequestUrls, StatusResponse};
use crate::config::StatusPayload;
use crate::error::AgentError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ReqwestHttpClient {
    client: Client,
    urls: RequestUrls,
}

impl ReqwestHttpClient {
    pub fn new(base_url: &str, application_id: &str, server_id: u32) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            urls: RequestUrls::new(base_url, application_id, server_id),
        })
    }

    fn classify(response: reqwest::blocking::Response) -> Result<StatusResponse, AgentError> {
        let status_code = response.status().as_u16();
        if status_code >= 400 {
            return Ok(StatusResponse {
                status_code,
                payload: None,
            });
        }
        let payload = response.json::<StatusPayload>().ok();
        Ok(StatusResponse {
            status_code,
            payload,
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send_status_request(
        &self,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError> {
        let url = super::with_config_timestamp(&self.urls.monitor_url, params);
        tracing::debug!(%url, "sending status request");
        let response = self.client.get(&url).send()?;
        Self::classify(response)
    }

    fn send_new_session_request(
        &self,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError> {
        let url = super::with_config_timestamp(&self.urls.new_session_url, params);
        tracing::debug!(%url, "sending new-session request");
        let response = self.client.get(&url).send()?;
        Self::classify(response)
    }

    fn send_beacon_request(
        &self,
        client_ip: Option<&str>,
        data: &str,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError> {
        let url = super::with_config_timestamp(&self.urls.monitor_url, params);
        tracing::debug!(%url, bytes = data.len(), "sending beacon request");
        let mut request = self.client.post(&url).body(data.to_string());
        if let Some(ip) = client_ip {
            request = request.header("X-Client-IP", ip);
        }
        let response = request.send()?;
        Self::classify(response)
    }
}
