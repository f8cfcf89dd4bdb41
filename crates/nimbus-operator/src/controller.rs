//! Control-plane and version controllers
//!
//! The control-plane controller runs one reconcile pass per invocation:
//! it ensures the version record exists, waits for it to be initialized,
//! runs every service through the generic skeleton in registry order,
//! rolls the per-service conditions up into the top-level Ready
//! condition, and bumps `deployed_version` only once every enabled
//! service's images match the target. The version controller resolves the
//! target version's per-component images.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info};

use nimbus_common::conditions::{reason, Condition, Conditions};
use nimbus_common::crd::{
    resolve_container_images, NimbusControlPlane, NimbusVersion, NimbusVersionSpec,
    VERSION_INITIALIZED,
};
use nimbus_common::Error;

use crate::reconcile::reconcile_service;
use crate::registry::REGISTRY;
use crate::rollout;
use crate::store::{owner_reference, ObjectStore};
use crate::Requeue;

/// Target version applied when a version record is first created
pub const DEFAULT_TARGET_VERSION: &str = "2025.1";

/// Steady-state requeue interval for drift detection
const STEADY_STATE_REQUEUE: Duration = Duration::from_secs(60);

/// Shared controller context
pub struct Context {
    /// Object store handle used by every engine
    pub store: Arc<dyn ObjectStore>,
}

impl Context {
    /// Create a context over a store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// Built-in default image for a component at a target version.
///
/// Overridable per component through a `RELATED_IMAGE_<COMPONENT>`
/// environment variable, the conventional release-pinning mechanism.
pub fn default_image(key: &str, target_version: &str) -> String {
    let env_key = format!(
        "RELATED_IMAGE_{}",
        key.to_uppercase().replace('-', "_")
    );
    std::env::var(env_key)
        .unwrap_or_else(|_| format!("registry.nimbus.dev/{key}:{target_version}"))
}

/// Default images for every registered component at a target version
pub fn image_defaults(target_version: &str) -> std::collections::BTreeMap<String, String> {
    let mut defaults = std::collections::BTreeMap::new();
    for descriptor in REGISTRY {
        for key in descriptor.image_keys {
            defaults.insert((*key).to_string(), default_image(key, target_version));
        }
    }
    defaults
}

/// Reconcile a NimbusControlPlane
pub async fn reconcile(
    plane: Arc<NimbusControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let mut plane = (*plane).clone();
    let name = plane.name_any();
    let namespace = plane.namespace().unwrap_or_default();
    info!(plane = %name, namespace = %namespace, "reconciling control plane");

    let status = plane.status.get_or_insert_with(Default::default);
    status.observed_generation = plane.metadata.generation;
    let saved_conditions = status.conditions.clone();
    init_conditions(&mut plane);

    // The version record is created alongside the plane and owned by it.
    let version = ensure_version(ctx.store.as_ref(), &plane).await?;
    if !version.is_initialized() {
        debug!(plane = %name, "version record not initialized yet");
        finalize_status(ctx.store.as_ref(), &mut plane, &saved_conditions).await?;
        return Ok(Action::requeue(Duration::from_secs(10)));
    }

    for descriptor in REGISTRY {
        match reconcile_service(ctx.store.as_ref(), &mut plane, &version, descriptor).await {
            Ok(Requeue::No) => {}
            Ok(Requeue::After(delay)) => {
                debug!(plane = %name, service = %descriptor.kind, ?delay, "service pass requested retry");
                finalize_status(ctx.store.as_ref(), &mut plane, &saved_conditions).await?;
                return Ok(Action::requeue(delay));
            }
            Err(e) => {
                error!(plane = %name, service = %descriptor.kind, error = %e, "service pass failed");
                finalize_status(ctx.store.as_ref(), &mut plane, &saved_conditions).await?;
                return Err(e);
            }
        }
    }

    // All enabled services converged to the target's images: the version
    // counts as deployed. Any mismatch leaves the previous value in place.
    if rollout::control_plane_images_match(&plane, &version) {
        let target = version.spec.target_version.clone();
        let status = plane.status.get_or_insert_with(Default::default);
        if status.deployed_version.as_deref() != Some(target.as_str()) {
            info!(plane = %name, version = %target, "deployment converged to target version");
            status.deployed_version = Some(target);
        }
    }

    finalize_status(ctx.store.as_ref(), &mut plane, &saved_conditions).await?;
    Ok(Action::requeue(STEADY_STATE_REQUEUE))
}

/// Error policy for the control-plane controller.
///
/// Retryable errors (transient collaborator failures) back off; permanent
/// errors wait for a spec change.
pub fn error_policy(
    plane: Arc<NimbusControlPlane>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        plane = %plane.name_any(),
        %error,
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

/// Seed an Unknown condition for every enabled service that has not
/// reported yet, so the rolled-up Ready condition never claims a state
/// it cannot justify.
fn init_conditions(plane: &mut NimbusControlPlane) {
    let pending: Vec<String> = REGISTRY
        .iter()
        .filter(|d| plane.spec.section(d.kind.field()).enabled)
        .map(|d| d.ready_condition())
        .collect();
    let status = plane.status.get_or_insert_with(Default::default);
    for condition_type in pending {
        if status.conditions.get(&condition_type).is_none() {
            status.conditions.set(Condition::unknown(
                condition_type,
                reason::INIT,
                "setup started",
            ));
        }
    }
}

/// Ensure the version record exists with ownership linkage and return it
async fn ensure_version(
    store: &dyn ObjectStore,
    plane: &NimbusControlPlane,
) -> Result<NimbusVersion, Error> {
    let namespace = plane.namespace().unwrap_or_default();
    let name = plane.name_any();

    if let Some(version) = store.get_version(&namespace, &name).await? {
        return Ok(version);
    }

    info!(version = %name, "version record does not exist, creating");
    let mut desired = NimbusVersion::new(
        &name,
        NimbusVersionSpec {
            target_version: DEFAULT_TARGET_VERSION.to_string(),
            ..Default::default()
        },
    );
    desired.metadata.namespace = Some(namespace.clone());
    desired.metadata.owner_references = Some(vec![owner_reference(plane)]);
    store.upsert_version(desired.clone()).await?;
    Ok(desired)
}

/// Roll up the Ready condition, restore unchanged transition times and
/// persist the status. Runs on every exit path of a pass so the aggregate
/// reflects what actually happened.
async fn finalize_status(
    store: &dyn ObjectStore,
    plane: &mut NimbusControlPlane,
    saved: &Conditions,
) -> Result<(), Error> {
    let status = plane.status.get_or_insert_with(Default::default);
    rollout::aggregate_ready(&mut status.conditions);
    status.conditions.restore_transition_times(saved);
    store.update_control_plane_status(plane).await
}

/// Reconcile a NimbusVersion: resolve the effective per-component images
/// (custom overrides win over built-in defaults) and mark the record
/// initialized.
pub async fn reconcile_version(
    version: Arc<NimbusVersion>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let mut version = (*version).clone();
    let name = version.name_any();
    debug!(version = %name, "reconciling version record");

    let defaults = image_defaults(&version.spec.target_version);
    let images = resolve_container_images(&defaults, &version.spec.custom_container_images);

    let status = version.status.get_or_insert_with(Default::default);
    status.observed_generation = version.metadata.generation;
    status.container_images = images;
    status.conditions.mark_true(
        VERSION_INITIALIZED,
        format!("container images resolved for {}", version.spec.target_version),
    );

    ctx.store.update_version_status(&version).await?;
    Ok(Action::requeue(STEADY_STATE_REQUEUE))
}

/// Error policy for the version controller
pub fn version_error_policy(
    version: Arc<NimbusVersion>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(version = %version.name_any(), %error, "version reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockObjectStore, OpResult};
    use kube::core::ObjectMeta;
    use nimbus_common::conditions::{Condition, READY};
    use nimbus_common::crd::{
        ManagedService, ManagedServiceSpec, ManagedServiceStatus, NimbusControlPlaneSpec,
        NimbusVersionStatus,
    };
    use std::sync::Mutex;

    fn plane_with(enabled: &[&str]) -> NimbusControlPlane {
        let mut spec = NimbusControlPlaneSpec {
            secret: "platform-secret".into(),
            ..Default::default()
        };
        for field in enabled {
            spec.section_mut(field).enabled = true;
        }
        let mut plane = NimbusControlPlane::new("plane", spec);
        plane.metadata.namespace = Some("cloud".into());
        plane.metadata.uid = Some("uid-1".into());
        plane.metadata.generation = Some(2);
        plane
    }

    fn initialized_version() -> NimbusVersion {
        let mut version = NimbusVersion::new(
            "plane",
            NimbusVersionSpec {
                target_version: "2025.1".into(),
                ..Default::default()
            },
        );
        let mut status = NimbusVersionStatus {
            container_images: image_defaults("2025.1"),
            ..Default::default()
        };
        status.conditions.mark_true(VERSION_INITIALIZED, "resolved");
        version.status = Some(status);
        version
    }

    fn ready_child(name: &str) -> ManagedService {
        let mut conditions = Conditions::default();
        conditions.set(Condition::true_(READY, "ready"));
        ManagedService {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("cloud".into()),
                generation: Some(1),
                ..Default::default()
            },
            spec: ManagedServiceSpec {
                service: name.into(),
                ..Default::default()
            },
            status: Some(ManagedServiceStatus {
                observed_generation: Some(1),
                conditions,
            }),
        }
    }

    /// Story: a converged pass marks the plane Ready and bumps the
    /// deployed version
    #[tokio::test]
    async fn story_converged_pass_bumps_deployed_version() {
        let patched: Arc<Mutex<Option<NimbusControlPlane>>> = Arc::default();
        let sink = patched.clone();

        let mut store = MockObjectStore::new();
        store
            .expect_get_version()
            .returning(|_, _| Ok(Some(initialized_version())));
        store
            .expect_get_managed_service()
            .returning(|_, name| Ok(Some(ready_child(name))));
        store
            .expect_upsert_managed_service()
            .returning(|_| Ok(OpResult::Unchanged));
        // disabled services get their artifacts cleaned up idempotently
        store
            .expect_delete_managed_service()
            .returning(|_, _| Ok(()));
        store
            .expect_delete_app_credential()
            .returning(|_, _| Ok(()));
        store.expect_delete_certificate().returning(|_, _| Ok(()));
        store
            .expect_list_endpoints_with_label()
            .returning(|_, _| Ok(vec![]));
        store
            .expect_update_control_plane_status()
            .returning(move |plane| {
                *sink.lock().unwrap() = Some(plane.clone());
                Ok(())
            });

        let plane = Arc::new(plane_with(&["database", "cache"]));
        let ctx = Arc::new(Context::new(Arc::new(store)));

        let action = reconcile(plane, ctx).await.unwrap();
        assert_eq!(action, Action::requeue(STEADY_STATE_REQUEUE));

        let patched = patched.lock().unwrap();
        let status = patched.as_ref().unwrap().status.as_ref().unwrap();
        assert!(status.conditions.is_true(READY));
        assert!(status.conditions.is_true("DatabaseReady"));
        assert_eq!(status.deployed_version.as_deref(), Some("2025.1"));
        assert_eq!(status.observed_generation, Some(2));
    }

    /// Story: an uninitialized version record defers the whole pass
    #[tokio::test]
    async fn story_uninitialized_version_defers_pass() {
        let mut store = MockObjectStore::new();
        store.expect_get_version().returning(|_, _| {
            let mut version = initialized_version();
            version.status = None;
            Ok(Some(version))
        });
        store.expect_upsert_managed_service().never();
        store
            .expect_update_control_plane_status()
            .returning(|_| Ok(()));

        let plane = Arc::new(plane_with(&["database"]));
        let ctx = Arc::new(Context::new(Arc::new(store)));

        let action = reconcile(plane, ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    /// Story: a missing version record is created with ownership linkage
    #[tokio::test]
    async fn story_missing_version_record_is_created() {
        let mut store = MockObjectStore::new();
        store.expect_get_version().returning(|_, _| Ok(None));
        store
            .expect_upsert_version()
            .times(1)
            .withf(|desired| {
                desired.name_any() == "plane"
                    && desired.spec.target_version == DEFAULT_TARGET_VERSION
                    && desired
                        .metadata
                        .owner_references
                        .as_ref()
                        .is_some_and(|refs| refs.len() == 1)
            })
            .returning(|_| Ok(OpResult::Created));
        store
            .expect_update_control_plane_status()
            .returning(|_| Ok(()));

        let plane = Arc::new(plane_with(&[]));
        let ctx = Arc::new(Context::new(Arc::new(store)));

        // the freshly created record is not initialized, so the pass defers
        let action = reconcile(plane, ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    /// Story: a service still converging onto the target images leaves
    /// the deployed version untouched
    #[tokio::test]
    async fn story_unconverged_service_blocks_deployed_version() {
        let patched: Arc<Mutex<Option<NimbusControlPlane>>> = Arc::default();
        let sink = patched.clone();

        let mut store = MockObjectStore::new();
        store
            .expect_get_version()
            .returning(|_, _| Ok(Some(initialized_version())));
        store.expect_get_managed_service().returning(|_, name| {
            // the child has not observed its retargeted spec yet
            let mut child = ready_child(name);
            child.metadata.generation = Some(2);
            Ok(Some(child))
        });
        store
            .expect_upsert_managed_service()
            .returning(|_| Ok(OpResult::Updated));
        store
            .expect_delete_managed_service()
            .returning(|_, _| Ok(()));
        store
            .expect_delete_app_credential()
            .returning(|_, _| Ok(()));
        store.expect_delete_certificate().returning(|_, _| Ok(()));
        store
            .expect_update_control_plane_status()
            .returning(move |plane| {
                *sink.lock().unwrap() = Some(plane.clone());
                Ok(())
            });

        let plane = plane_with(&["database"]);
        let ctx = Arc::new(Context::new(Arc::new(store)));

        reconcile(Arc::new(plane), ctx).await.unwrap();

        let patched = patched.lock().unwrap();
        let status = patched.as_ref().unwrap().status.as_ref().unwrap();
        // no cached image for the unconverged service, no version bump
        assert_eq!(status.deployed_version, None);
        assert!(!status.conditions.is_true("DatabaseReady"));
    }

    /// Story: the version controller resolves images and marks the
    /// record initialized
    #[tokio::test]
    async fn story_version_controller_initializes_record() {
        let patched: Arc<Mutex<Option<NimbusVersion>>> = Arc::default();
        let sink = patched.clone();

        let mut store = MockObjectStore::new();
        store.expect_update_version_status().returning(move |version| {
            *sink.lock().unwrap() = Some(version.clone());
            Ok(())
        });

        let mut version = NimbusVersion::new(
            "plane",
            NimbusVersionSpec {
                target_version: "2025.1".into(),
                custom_container_images: [(
                    "identity-api".to_string(),
                    "registry.example.com/identity:custom".to_string(),
                )]
                .into(),
            },
        );
        version.metadata.namespace = Some("cloud".into());
        let ctx = Arc::new(Context::new(Arc::new(store)));

        reconcile_version(Arc::new(version), ctx).await.unwrap();

        let patched = patched.lock().unwrap();
        let status = patched.as_ref().unwrap().status.as_ref().unwrap();
        assert!(status.conditions.is_true(VERSION_INITIALIZED));
        assert_eq!(
            status.container_images.get("identity-api").map(String::as_str),
            Some("registry.example.com/identity:custom")
        );
        // non-overridden components fall back to the built-in default
        assert_eq!(
            status.container_images.get("cache").map(String::as_str),
            Some("registry.nimbus.dev/cache:2025.1")
        );
    }

    /// Story: error policy distinguishes retryable from permanent errors
    #[test]
    fn story_error_policy_backoff() {
        let plane = Arc::new(plane_with(&[]));
        let ctx = Arc::new(Context::new(Arc::new(MockObjectStore::new())));

        let transient = Error::internal_with_context("store", "connection reset");
        assert_eq!(
            error_policy(plane.clone(), &transient, ctx.clone()),
            Action::requeue(Duration::from_secs(30))
        );

        let permanent = Error::validation("bad spec");
        assert_eq!(error_policy(plane, &permanent, ctx), Action::await_change());
    }

    #[test]
    fn test_default_image_format() {
        assert_eq!(
            default_image("identity-api", "2025.1"),
            "registry.nimbus.dev/identity-api:2025.1"
        );
    }

    #[test]
    fn test_image_defaults_cover_all_components() {
        let defaults = image_defaults("2025.1");
        for descriptor in REGISTRY {
            for key in descriptor.image_keys {
                assert!(defaults.contains_key(*key), "missing default for {key}");
            }
        }
    }
}
