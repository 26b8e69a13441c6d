//! Binding protocol client
//!
//! Thin wrapper over the sibling service's HTTP endpoint at
//! `http://<pod-ip>:8080`. Every operation returns a plain `bool`: network
//! failure, timeout, a non-200 status, or an unparseable body all collapse
//! to `false`. Absence of proof is treated as "not bound", and the caller
//! retries on the next reconciliation pass instead of propagating an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// TCP port the sibling service listens on inside the workload pod
pub const BINDING_PORT: u16 = 8080;

/// Per-request timeout; a dead endpoint must not stall the reconcile loop
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Occupancy report returned by `GET /hasClients`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientsOnboard {
    #[serde(default)]
    clients_onboard: i64,
}

/// Trait abstracting the binding protocol for testability
///
/// All three operations are idempotent from the caller's perspective:
/// repeated calls with the same arguments are safe to retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BindingClient: Send + Sync {
    /// True iff the identifier is already registered at that address
    async fn is_client_bound(&self, client_id: &str, address: &str) -> bool;

    /// Attempt registration; true only on a success response
    async fn bind_client(&self, client_id: &str, address: &str) -> bool;

    /// True iff the endpoint reports a positive occupancy count
    async fn has_any_clients(&self, address: &str) -> bool;
}

fn endpoint(address: &str, port: u16, path: &str) -> String {
    format!("http://{address}:{port}{path}")
}

/// Production binding client over reqwest
pub struct HttpBindingClient {
    http: reqwest::Client,
    port: u16,
}

impl HttpBindingClient {
    /// Create a new HttpBindingClient with its own connection pool
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            port: BINDING_PORT,
        }
    }

    /// Create a client targeting a non-standard port
    #[cfg(test)]
    fn with_port(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            port,
        }
    }
}

impl Default for HttpBindingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BindingClient for HttpBindingClient {
    async fn is_client_bound(&self, client_id: &str, address: &str) -> bool {
        let url = endpoint(address, self.port, &format!("/client/{client_id}"));
        match self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(error = %e, url = %url, "bound query failed");
                false
            }
        }
    }

    async fn bind_client(&self, client_id: &str, address: &str) -> bool {
        let url = endpoint(address, self.port, "/addClient");
        let body = serde_json::json!({
            "clientId": client_id,
            "IP": address,
        });
        match self
            .http
            .post(&url)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(error = %e, url = %url, "bind request failed");
                false
            }
        }
    }

    async fn has_any_clients(&self, address: &str) -> bool {
        let url = endpoint(address, self.port, "/hasClients");
        let resp = match self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => resp,
            Ok(resp) => {
                debug!(status = %resp.status(), url = %url, "occupancy query rejected");
                return false;
            }
            Err(e) => {
                debug!(error = %e, url = %url, "occupancy query failed");
                return false;
            }
        };

        match resp.json::<ClientsOnboard>().await {
            Ok(report) => report.clients_onboard > 0,
            Err(e) => {
                debug!(error = %e, url = %url, "occupancy body unparseable");
                false
            }
        }
    }
}
