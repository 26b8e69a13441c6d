//! Workload descriptor builder
//!
//! Pure mapping from a Client's declared spec to the pod that runs it,
//! plus the generation-identity helpers shared with the controller.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::binding::BINDING_PORT;
use crate::crd::{Client, ClientSpec};

/// Environment variable carrying the client identifier into the workload
pub const CLIENT_ID_ENV: &str = "CLIENT_ID";

/// Deterministic workload object name for an image/tag pair.
///
/// Used only as the pod's object name and store lookup key; generation
/// comparisons use [`generation`] instead.
pub fn workload_name(image: &str, tag: &str) -> String {
    format!("{image}-{tag}")
}

/// Collision-free generation identity for an image/tag pair.
///
/// A tag cannot contain `:`, so this form is unambiguous where the raw
/// concatenation of image and tag would not be.
pub fn generation(image: &str, tag: &str) -> String {
    format!("{image}:{tag}")
}

fn workload_labels(spec: &ClientSpec) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), spec.container_image.clone()),
        ("version".to_string(), spec.container_tag.clone()),
    ])
}

/// Build the pod that satisfies the Client's declared spec.
///
/// The pod carries the controller owner reference so deleting the Client
/// cascades to it. Restart policy is OnFailure: a cleanly exited workload
/// surfaces as `Succeeded` and is retired rather than restarted.
pub fn build_workload(client: &Client) -> Pod {
    let spec = &client.spec;

    Pod {
        metadata: ObjectMeta {
            name: Some(workload_name(&spec.container_image, &spec.container_tag)),
            namespace: client.namespace(),
            labels: Some(workload_labels(spec)),
            owner_references: client.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: spec.container_image.clone(),
                image: Some(format!(
                    "{}:{}",
                    spec.container_image, spec.container_tag
                )),
                env: Some(vec![EnvVar {
                    name: CLIENT_ID_ENV.to_string(),
                    value: Some(spec.client_id.clone()),
                    ..Default::default()
                }]),
                ports: Some(vec![ContainerPort {
                    name: Some("http".to_string()),
                    container_port: BINDING_PORT as i32,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            restart_policy: Some("OnFailure".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}
