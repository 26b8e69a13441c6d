//! Client controller implementation
//!
//! This module implements the reconciliation logic for Client resources.
//! Each pass observes the Client's declared spec and the workload pod it
//! maps to, computes the next status with pure decision functions, executes
//! any store mutations, and persists the status only when it changed.
//!
//! The lifecycle is a three-phase cycle. Provisioning (Pending -> Running)
//! is decoupled from binding (Running, once the pod is ready), and both are
//! decoupled from teardown of a previous generation (Cleaning): a workload
//! cannot be deleted while clients are still bound to it, so Cleaning polls
//! occupancy before tearing down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::binding::{BindingClient, HttpBindingClient};
use crate::crd::{Client as ClientResource, ClientPhase, ClientSpec, ClientStatus};
use crate::error::Error;
use crate::resources::{build_workload, generation, workload_name};
use crate::Result;

/// Field manager for server-side apply and status patches
pub const FIELD_MANAGER: &str = "clientmgr-operator";

/// Backoff applied by the error policy for retryable failures
const ERROR_REQUEUE_SECS: u64 = 30;

/// Requeue interval while waiting on workload scheduling or readiness.
///
/// Stands in for a workqueue backoff-requeue: owned-pod events usually
/// re-trigger reconciliation sooner, so this is the fallback poll when no
/// event arrives.
const AWAIT_REQUEUE_SECS: u64 = 5;

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Trait abstracting the resource store operations the controller needs
///
/// `get_workload` folds 404 into `Ok(None)`: not-found is a branch of the
/// state machine, never a failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Get a workload pod by name, `Ok(None)` when absent
    async fn get_workload(&self, name: &str, namespace: &str) -> Result<Option<Pod>>;

    /// Create a workload pod
    async fn create_workload(&self, pod: &Pod) -> Result<()>;

    /// Delete a workload pod; tolerates the pod being already gone
    async fn delete_workload(&self, name: &str, namespace: &str) -> Result<()>;

    /// Patch the status subresource of a Client
    async fn patch_client_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ClientStatus,
    ) -> Result<()>;
}

/// Real Kubernetes store implementation
pub struct WorkloadStoreImpl {
    client: Client,
}

impl WorkloadStoreImpl {
    /// Create a new WorkloadStoreImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadStore for WorkloadStoreImpl {
    async fn get_workload(&self, name: &str, namespace: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_workload(&self, pod: &Pod) -> Result<()> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn delete_workload(&self, name: &str, namespace: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_client_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ClientStatus,
    ) -> Result<()> {
        let api: Api<ClientResource> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Controller context shared across all reconciliation calls
pub struct Context {
    /// Resource store for workload pods and Client status
    pub store: Arc<dyn WorkloadStore>,
    /// Binding protocol client for the sibling service
    pub binding: Arc<dyn BindingClient>,
}

impl Context {
    /// Create a context backed by the real store and binding client
    pub fn from_client(client: Client) -> Self {
        Self {
            store: Arc::new(WorkloadStoreImpl::new(client)),
            binding: Arc::new(HttpBindingClient::new()),
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(store: Arc<dyn WorkloadStore>, binding: Arc<dyn BindingClient>) -> Self {
        Self { store, binding }
    }
}

// =============================================================================
// Pure decision layer
// =============================================================================

/// What a single store read of the desired workload showed
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadState {
    /// No pod with the desired name exists
    Missing,
    /// Pod exists but is still scheduling
    Scheduling,
    /// Pod is running; readiness and address come from its first container
    Running {
        /// First container readiness flag
        ready: bool,
        /// Pod IP, absent until the network is attached
        ip: Option<String>,
    },
    /// Pod ran to completion or failed
    Terminated {
        /// Human-readable termination reason for logging
        reason: String,
    },
    /// Phase not recognized; observe again later
    Unknown,
}

/// Classify an observed pod (or its absence) into a [`WorkloadState`]
pub fn observe_workload(pod: Option<&Pod>) -> WorkloadState {
    let Some(pod) = pod else {
        return WorkloadState::Missing;
    };
    let Some(status) = pod.status.as_ref() else {
        return WorkloadState::Unknown;
    };

    match status.phase.as_deref() {
        Some("Pending") => WorkloadState::Scheduling,
        Some("Running") => {
            let ready = status
                .container_statuses
                .as_ref()
                .and_then(|cs| cs.first())
                .map(|c| c.ready)
                .unwrap_or(false);
            WorkloadState::Running {
                ready,
                ip: status.pod_ip.clone(),
            }
        }
        Some("Failed") | Some("Succeeded") => {
            let reason = status
                .reason
                .clone()
                .or_else(|| status.message.clone())
                .or_else(|| status.phase.clone())
                .unwrap_or_default();
            WorkloadState::Terminated { reason }
        }
        _ => WorkloadState::Unknown,
    }
}

/// Control directive handed back to the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Nothing left to do; wait for the next change notification
    Done,
    /// Re-enter the state machine without waiting for an external trigger
    RequeueNow,
    /// Try again after the given delay
    RequeueAfter(Duration),
}

impl Directive {
    /// Translate into a kube-runtime [`Action`]
    pub fn into_action(self) -> Action {
        match self {
            Directive::Done => Action::await_change(),
            Directive::RequeueNow => Action::requeue(Duration::ZERO),
            Directive::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Pure outcome of evaluating the Running branch against one observation
#[derive(Clone, Debug, PartialEq)]
pub enum RunningAction {
    /// First provisioning: create the owned workload pod
    CreateWorkload,
    /// The adopted workload is gone or terminated; move to Cleaning
    EnterCleaning,
    /// Pod still scheduling (or in an unrecognized phase); observe again
    AwaitScheduling,
    /// Pod running but not yet ready to accept a binding
    AwaitReadiness,
    /// Pod ready and unadopted: probe the binding at this address
    ProbeBinding {
        /// Pod IP to probe
        ip: String,
    },
    /// Current generation already adopted; nothing to do
    Settled,
}

/// Evaluate the Running branch of the state machine.
///
/// Binding is only attempted while `lastGeneration` differs from the
/// desired generation: once a generation is adopted (via Cleaning) the
/// running pod is left alone.
pub fn running_action(
    status: &ClientStatus,
    spec: &ClientSpec,
    workload: &WorkloadState,
) -> RunningAction {
    match workload {
        WorkloadState::Missing => {
            if status
                .last_workload_name
                .as_deref()
                .unwrap_or_default()
                .is_empty()
            {
                RunningAction::CreateWorkload
            } else {
                // Deleted out from under us, e.g. by the Cleaning phase of
                // a prior generation
                RunningAction::EnterCleaning
            }
        }
        WorkloadState::Terminated { .. } => RunningAction::EnterCleaning,
        WorkloadState::Running { ready, ip } => {
            let desired = generation(&spec.container_image, &spec.container_tag);
            if status.last_generation.as_deref() == Some(desired.as_str()) {
                return RunningAction::Settled;
            }
            if !ready {
                return RunningAction::AwaitReadiness;
            }
            match ip.as_deref() {
                Some(ip) if !ip.is_empty() => RunningAction::ProbeBinding { ip: ip.to_string() },
                // Ready without an address yet; treat like not-ready
                _ => RunningAction::AwaitReadiness,
            }
        }
        WorkloadState::Scheduling | WorkloadState::Unknown => RunningAction::AwaitScheduling,
    }
}

/// Phase transition produced by a binding probe.
///
/// `Some(Cleaning)` only on a fresh successful bind: an already-bound client
/// needs no action, and a failed bind stays in Running so the next
/// observation retries.
pub fn bound_transition(already_bound: bool, bind_succeeded: bool) -> Option<ClientPhase> {
    if !already_bound && bind_succeeded {
        Some(ClientPhase::Cleaning)
    } else {
        None
    }
}

/// Pure outcome of evaluating the Cleaning branch against one observation
#[derive(Clone, Debug, PartialEq)]
pub struct CleaningOutcome {
    /// Whether the superseded workload should be deleted this pass
    pub delete_workload: bool,
    /// The status to adopt after this pass
    pub next: ClientStatus,
}

/// Evaluate the Cleaning branch of the state machine.
///
/// Deletion is deferred while clients remain bound or while the Client
/// itself is being torn down (the owner cascade handles the pod then).
/// The next phase comes from comparing the adopted generation to the
/// currently desired one: a differing generation rolls forward to Running,
/// a matching one restarts the whole cycle from Pending.
pub fn cleaning_outcome(
    spec: &ClientSpec,
    status: &ClientStatus,
    workload_present: bool,
    being_deleted: bool,
    has_clients: bool,
) -> CleaningOutcome {
    let delete_workload = workload_present && !being_deleted && !has_clients;

    let desired = generation(&spec.container_image, &spec.container_tag);
    let next = if status.last_generation.as_deref() != Some(desired.as_str()) {
        // Spec changed since the workload was last provisioned (or this is
        // the first cycle): adopt the new generation and loop back to
        // provision/bind it
        ClientStatus {
            phase: ClientPhase::Running,
            last_workload_name: Some(workload_name(
                &spec.container_image,
                &spec.container_tag,
            )),
            last_generation: Some(desired),
        }
    } else {
        // Purely retiring the old instance; restart the cycle from scratch
        ClientStatus::with_phase(ClientPhase::Pending)
    };

    CleaningOutcome {
        delete_workload,
        next,
    }
}

// =============================================================================
// Reconciliation driver
// =============================================================================

/// Reconcile a Client resource
///
/// Invoked by the controller runtime once per change notification or
/// requeue. Reads the store and the binding client, mutates the Client's
/// status, and returns when (if at all) to re-invoke.
#[instrument(skip(client, ctx), fields(client = %client.name_any()))]
pub async fn reconcile(
    client: Arc<ClientResource>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = client.name_any();
    let namespace = match client.metadata.namespace.as_deref() {
        Some(ns) => ns,
        None => {
            error!("Client resource is missing a namespace");
            return Ok(Action::await_change());
        }
    };

    // Snapshot status at entry; persistence at the end is driven by the
    // diff against this snapshot
    let entry_status = client.status.clone().unwrap_or_default();
    let mut status = entry_status.clone();

    debug!(phase = ?status.phase, "reconciling client");

    let directive = match status.phase {
        ClientPhase::Pending => {
            status.phase = ClientPhase::Running;
            ctx.store
                .patch_client_status(&name, namespace, &status)
                .await?;
            info!(phase = ?status.phase, "client activated");
            return Ok(Directive::RequeueNow.into_action());
        }
        ClientPhase::Running => {
            let desired_name =
                workload_name(&client.spec.container_image, &client.spec.container_tag);
            let pod = ctx.store.get_workload(&desired_name, namespace).await?;
            let state = observe_workload(pod.as_ref());

            match running_action(&status, &client.spec, &state) {
                RunningAction::CreateWorkload => {
                    let pod = build_workload(&client);
                    ctx.store.create_workload(&pod).await?;
                    info!(workload = %desired_name, "workload created");
                    // The created pod's own events re-trigger reconciliation
                    Directive::Done
                }
                RunningAction::EnterCleaning => {
                    if let WorkloadState::Terminated { reason } = &state {
                        info!(workload = %desired_name, reason = %reason, "workload terminated");
                    }
                    status.phase = ClientPhase::Cleaning;
                    Directive::Done
                }
                RunningAction::AwaitScheduling => {
                    debug!(workload = %desired_name, "workload still scheduling");
                    Directive::RequeueAfter(Duration::from_secs(AWAIT_REQUEUE_SECS))
                }
                RunningAction::AwaitReadiness => {
                    debug!(workload = %desired_name, "container not ready, rescheduling bind");
                    Directive::RequeueAfter(Duration::from_secs(AWAIT_REQUEUE_SECS))
                }
                RunningAction::ProbeBinding { ip } => {
                    info!(ip = %ip, "attempting to bind client");
                    let already_bound =
                        ctx.binding.is_client_bound(&client.spec.client_id, &ip).await;
                    let bound_now = !already_bound
                        && ctx.binding.bind_client(&client.spec.client_id, &ip).await;

                    if already_bound {
                        info!(client_id = %client.spec.client_id, "client already bound");
                    } else if bound_now {
                        info!(
                            client_id = %client.spec.client_id,
                            workload = %desired_name,
                            "client bound to workload"
                        );
                    } else {
                        info!(
                            client_id = %client.spec.client_id,
                            "client not added, retrying on next observation"
                        );
                    }

                    if let Some(next_phase) = bound_transition(already_bound, bound_now) {
                        status.phase = next_phase;
                    }
                    Directive::Done
                }
                RunningAction::Settled => Directive::Done,
            }
        }
        ClientPhase::Cleaning => {
            let last_name = status.last_workload_name.clone().unwrap_or_default();
            let pod = if last_name.is_empty() {
                None
            } else {
                ctx.store.get_workload(&last_name, namespace).await?
            };

            // Probe occupancy at the old workload's actual address; a
            // missing pod or missing IP yields "no clients"
            let has_clients = match pod
                .as_ref()
                .and_then(|p| p.status.as_ref())
                .and_then(|s| s.pod_ip.as_deref())
            {
                Some(ip) if !ip.is_empty() => ctx.binding.has_any_clients(ip).await,
                _ => false,
            };

            let being_deleted = client.metadata.deletion_timestamp.is_some();
            let outcome = cleaning_outcome(
                &client.spec,
                &status,
                pod.is_some(),
                being_deleted,
                has_clients,
            );

            if outcome.delete_workload {
                ctx.store.delete_workload(&last_name, namespace).await?;
                info!(workload = %last_name, "superseded workload removed");
            } else if pod.is_some() {
                debug!(workload = %last_name, "deferring workload deletion");
            }

            status = outcome.next;
            if outcome.delete_workload {
                Directive::RequeueNow
            } else {
                Directive::Done
            }
        }
    };

    if status != entry_status {
        ctx.store
            .patch_client_status(&name, namespace, &status)
            .await?;
        info!(phase = ?status.phase, "client status updated");
        return Ok(Directive::RequeueNow.into_action());
    }

    Ok(directive.into_action())
}

/// Error policy for the Client controller
///
/// Retryable errors (transient store failures) requeue with backoff;
/// permanent errors wait for a spec change.
pub fn error_policy(client: Arc<ClientResource>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        client = %client.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
    } else {
        Action::await_change()
    }
}

// =============================================================================
// Tests
// =============================================================================
