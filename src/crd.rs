//! Client CRD definition
//!
//! A Client declares a desired container image/tag and a client identifier
//! to register with the sibling service running inside the workload pod.
//! Status is owned exclusively by the controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Client declares a workload pod plus a client registration against it.
///
/// Example:
/// ```yaml
/// apiVersion: clientmgr.io/v1
/// kind: Client
/// metadata:
///   name: trader-1
///   namespace: default
/// spec:
///   containerImage: svc
///   containerTag: v1
///   clientId: c1
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "clientmgr.io",
    version = "v1",
    kind = "Client",
    namespaced,
    status = "ClientStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Workload","type":"string","jsonPath":".status.lastWorkloadName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// Container image to run (without tag)
    pub container_image: String,

    /// Container image tag
    pub container_tag: String,

    /// Client identifier registered with the sibling service
    pub client_id: String,
}

/// Client status, written only by the controller via the status subresource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ClientPhase,

    /// Object name of the most recently adopted workload generation.
    ///
    /// Used for store lookups during cleaning. Cleared when no generation
    /// is current.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_workload_name: Option<String>,

    /// Structured generation identity of the adopted workload, formatted
    /// `image:tag`.
    ///
    /// All "did the spec change" comparisons use this field rather than the
    /// workload name: a tag cannot contain `:`, so `("a","bc")` and
    /// `("ab","c")` can never collide here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_generation: Option<String>,
}

impl ClientStatus {
    /// Create a status with the given phase and no adopted generation
    pub fn with_phase(phase: ClientPhase) -> Self {
        Self {
            phase,
            last_workload_name: None,
            last_generation: None,
        }
    }
}

/// Client lifecycle phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClientPhase {
    /// Freshly observed, not yet activated
    #[default]
    Pending,
    /// Provisioning and binding the desired workload generation
    Running,
    /// Retiring a superseded workload generation
    Cleaning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_client_yaml() {
        let yaml = r#"
apiVersion: clientmgr.io/v1
kind: Client
metadata:
  name: trader-1
  namespace: default
spec:
  containerImage: svc
  containerTag: v1
  clientId: c1
"#;
        let client: Client = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(client.spec.container_image, "svc");
        assert_eq!(client.spec.container_tag, "v1");
        assert_eq!(client.spec.client_id, "c1");
        assert!(client.status.is_none());
    }

    #[test]
    fn client_with_status_yaml() {
        let yaml = r#"
apiVersion: clientmgr.io/v1
kind: Client
metadata:
  name: trader-1
spec:
  containerImage: svc
  containerTag: v2
  clientId: c1
status:
  phase: Cleaning
  lastWorkloadName: svc-v1
  lastGeneration: "svc:v1"
"#;
        let client: Client = serde_yaml::from_str(yaml).expect("parse");
        let status = client.status.expect("status");
        assert_eq!(status.phase, ClientPhase::Cleaning);
        assert_eq!(status.last_workload_name.as_deref(), Some("svc-v1"));
        assert_eq!(status.last_generation.as_deref(), Some("svc:v1"));
    }

    #[test]
    fn phase_defaults_to_pending() {
        let status = ClientStatus::default();
        assert_eq!(status.phase, ClientPhase::Pending);
        assert!(status.last_workload_name.is_none());
        assert!(status.last_generation.is_none());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ClientStatus {
            phase: ClientPhase::Running,
            last_workload_name: Some("svc-v1".to_string()),
            last_generation: Some("svc:v1".to_string()),
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["phase"], "Running");
        assert_eq!(json["lastWorkloadName"], "svc-v1");
        assert_eq!(json["lastGeneration"], "svc:v1");
    }

    #[test]
    fn empty_status_omits_optional_fields() {
        let status = ClientStatus::with_phase(ClientPhase::Pending);
        let json = serde_json::to_value(&status).expect("serialize");
        assert!(json.get("lastWorkloadName").is_none());
        assert!(json.get("lastGeneration").is_none());
    }
}
