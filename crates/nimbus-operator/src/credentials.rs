//! Application credential lifecycle engine
//!
//! Shared by every service: manages the auxiliary [`AppCredential`] object
//! whose issued secret gates the child's `credential_secret` field. The
//! engine is a small state machine re-evaluated each pass:
//!
//! - disabled → delete any existing credential, nothing to report
//! - required inputs not yet defaulted upstream → defer quietly
//! - credential exists and is ready → return its secret, no write
//! - credential exists but not ready → poll with a short fixed delay
//! - credential missing and parent not ready → defer (the parent service
//!   must exist before a credential for it makes sense)
//! - credential missing and parent ready → create it, then poll
//!
//! At most one credential exists per service; its name is a pure function
//! of the service name so creation is idempotent under retries.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use tracing::{debug, info};

use nimbus_common::crd::{
    AccessRule, AppCredential, AppCredentialSpec, CredentialOverlay, ServiceCredentialOverlay,
};
use nimbus_common::Error;

use crate::store::ObjectStore;
use crate::Requeue;

/// Expiration applied when neither overlay sets one
pub const DEFAULT_EXPIRATION_DAYS: i32 = 365;

/// Grace period applied when neither overlay sets one
pub const DEFAULT_GRACE_PERIOD_DAYS: i32 = 30;

/// Effective credential configuration after overlay merging
#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveCredential {
    pub expiration_days: i32,
    pub grace_period_days: i32,
    pub roles: Vec<String>,
    pub unrestricted: bool,
    pub access_rules: Vec<AccessRule>,
}

/// Whether credentials are in effect for a service: the global switch and
/// the per-service switch must both be on.
pub fn effective_enabled(
    global: &CredentialOverlay,
    overlay: Option<&ServiceCredentialOverlay>,
) -> bool {
    global.enabled && overlay.map(|o| o.enabled).unwrap_or(false)
}

/// Merge the global overlay with a per-service overlay.
///
/// An explicitly set per-service field always wins, including an
/// explicitly empty list; an unset field inherits the global value.
pub fn merge_overlays(
    global: &CredentialOverlay,
    overlay: Option<&ServiceCredentialOverlay>,
) -> EffectiveCredential {
    let expiration_days = overlay
        .and_then(|o| o.expiration_days)
        .or(global.expiration_days)
        .unwrap_or(DEFAULT_EXPIRATION_DAYS);
    let grace_period_days = overlay
        .and_then(|o| o.grace_period_days)
        .or(global.grace_period_days)
        .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS);
    let roles = overlay
        .and_then(|o| o.roles.clone())
        .unwrap_or_else(|| global.roles.clone());
    let unrestricted = overlay
        .and_then(|o| o.unrestricted)
        .or(global.unrestricted)
        .unwrap_or(false);
    let access_rules = overlay
        .and_then(|o| o.access_rules.clone())
        .unwrap_or_else(|| global.access_rules.clone());

    EffectiveCredential {
        expiration_days,
        grace_period_days,
        roles,
        unrestricted,
        access_rules,
    }
}

/// Inputs for one credential evaluation
pub struct CredentialInput<'a> {
    /// Namespace of the control plane
    pub namespace: &'a str,
    /// Resolved name of the owning service's child object
    pub service_name: &'a str,
    /// Whether the owning service currently reports ready
    pub service_ready: bool,
    /// Secret holding the service user's password
    pub secret: &'a str,
    /// Key inside `secret` holding the password
    pub password_selector: &'a str,
    /// Service user the credential authenticates as
    pub service_user: &'a str,
    /// Deployment-wide credential defaults
    pub global: &'a CredentialOverlay,
    /// Per-service overlay, if declared
    pub overlay: Option<&'a ServiceCredentialOverlay>,
    /// Owner reference linking the credential to the control plane
    pub owner: OwnerReference,
}

/// Evaluate the credential state machine for one service.
///
/// Returns the issued secret name once ready, or an empty result with a
/// retry hint while the credential is being created or issued. The caller
/// must not assume synchronous readiness after a create.
pub async fn ensure_app_credential(
    store: &dyn ObjectStore,
    input: CredentialInput<'_>,
) -> Result<(Option<String>, Requeue), Error> {
    let name = AppCredential::name_for(input.service_name);
    let existing = store.get_app_credential(input.namespace, &name).await?;

    if !effective_enabled(input.global, input.overlay) {
        if existing.is_some() {
            info!(
                service = %input.service_name,
                credential = %name,
                "application credential disabled, deleting existing object"
            );
            store.delete_app_credential(input.namespace, &name).await?;
        }
        return Ok((None, Requeue::No));
    }

    // The parent service's own defaulting has not run yet; defer quietly
    // rather than creating a credential against incomplete inputs.
    if input.secret.is_empty() || input.password_selector.is_empty() || input.service_user.is_empty()
    {
        debug!(
            service = %input.service_name,
            "credential inputs not yet defaulted, deferring"
        );
        return Ok((None, Requeue::No));
    }

    let effective = merge_overlays(input.global, input.overlay);

    if let Some(credential) = existing {
        if credential.is_ready() {
            let secret = credential.secret_name().map(String::from);
            return Ok((secret, Requeue::No));
        }
        debug!(
            service = %input.service_name,
            credential = %name,
            "application credential not ready yet, requeueing"
        );
        return Ok((None, Requeue::after_secs(10)));
    }

    if !input.service_ready {
        debug!(
            service = %input.service_name,
            "service not ready, deferring application credential creation"
        );
        return Ok((None, Requeue::No));
    }

    info!(
        service = %input.service_name,
        credential = %name,
        "service is ready, creating application credential"
    );
    let desired = AppCredential {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(input.namespace.to_string()),
            owner_references: Some(vec![input.owner]),
            ..Default::default()
        },
        spec: AppCredentialSpec {
            user_name: input.service_user.to_string(),
            secret: input.secret.to_string(),
            password_selector: input.password_selector.to_string(),
            expiration_days: effective.expiration_days,
            grace_period_days: effective.grace_period_days,
            roles: effective.roles,
            unrestricted: effective.unrestricted,
            access_rules: effective.access_rules,
        },
        status: None,
    };
    store.upsert_app_credential(desired).await?;

    // Created but not issued yet; poll for readiness.
    Ok((None, Requeue::after_secs(5)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockObjectStore, OpResult};
    use nimbus_common::conditions::Condition;
    use nimbus_common::crd::AppCredentialStatus;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "nimbus.dev/v1alpha1".into(),
            kind: "NimbusControlPlane".into(),
            name: "plane".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn enabled_global() -> CredentialOverlay {
        CredentialOverlay {
            enabled: true,
            expiration_days: Some(30),
            roles: vec!["service".into()],
            ..Default::default()
        }
    }

    fn enabled_overlay() -> ServiceCredentialOverlay {
        ServiceCredentialOverlay {
            enabled: true,
            ..Default::default()
        }
    }

    fn input<'a>(
        global: &'a CredentialOverlay,
        overlay: Option<&'a ServiceCredentialOverlay>,
        service_ready: bool,
    ) -> CredentialInput<'a> {
        CredentialInput {
            namespace: "cloud",
            service_name: "identity",
            service_ready,
            secret: "platform-secret",
            password_selector: "IdentityPassword",
            service_user: "identity",
            global,
            overlay,
            owner: owner(),
        }
    }

    fn credential(ready: bool) -> AppCredential {
        let mut conditions = nimbus_common::conditions::Conditions::default();
        if ready {
            conditions.set(Condition::true_("Ready", "issued"));
        }
        AppCredential {
            metadata: ObjectMeta {
                name: Some("identity-appcred".into()),
                namespace: Some("cloud".into()),
                ..Default::default()
            },
            spec: AppCredentialSpec::default(),
            status: Some(AppCredentialStatus {
                secret_name: ready.then(|| "identity-appcred-secret".to_string()),
                conditions,
            }),
        }
    }

    // =========================================================================
    // Overlay merge
    // =========================================================================

    /// Story: unset per-service fields inherit the global value
    #[test]
    fn story_unset_overlay_fields_inherit_global() {
        let global = CredentialOverlay {
            enabled: true,
            expiration_days: Some(30),
            grace_period_days: Some(7),
            roles: vec!["service".into()],
            unrestricted: Some(false),
            ..Default::default()
        };
        let overlay = ServiceCredentialOverlay {
            enabled: true,
            ..Default::default()
        };

        let effective = merge_overlays(&global, Some(&overlay));
        assert_eq!(effective.expiration_days, 30);
        assert_eq!(effective.grace_period_days, 7);
        assert_eq!(effective.roles, vec!["service".to_string()]);
        assert!(!effective.unrestricted);
    }

    /// Story: explicitly set per-service fields always win, including an
    /// explicitly empty role list
    #[test]
    fn story_explicit_overlay_fields_win() {
        let global = CredentialOverlay {
            enabled: true,
            expiration_days: Some(30),
            roles: vec!["service".into(), "reader".into()],
            ..Default::default()
        };
        let overlay = ServiceCredentialOverlay {
            enabled: true,
            expiration_days: Some(90),
            roles: Some(vec![]),
            unrestricted: Some(true),
            ..Default::default()
        };

        let effective = merge_overlays(&global, Some(&overlay));
        assert_eq!(effective.expiration_days, 90);
        // explicitly empty, not inherited
        assert!(effective.roles.is_empty());
        assert!(effective.unrestricted);
    }

    /// Story: built-in defaults apply when neither overlay sets a value
    #[test]
    fn story_builtin_defaults_fill_gaps() {
        let effective = merge_overlays(&CredentialOverlay::default(), None);
        assert_eq!(effective.expiration_days, DEFAULT_EXPIRATION_DAYS);
        assert_eq!(effective.grace_period_days, DEFAULT_GRACE_PERIOD_DAYS);
        assert!(effective.roles.is_empty());
        assert!(!effective.unrestricted);
    }

    /// Story: credentials require both the global and the service switch
    #[test]
    fn story_effective_enabled_requires_both_switches() {
        let on = enabled_global();
        let off = CredentialOverlay::default();
        let overlay_on = enabled_overlay();
        let overlay_off = ServiceCredentialOverlay::default();

        assert!(effective_enabled(&on, Some(&overlay_on)));
        assert!(!effective_enabled(&off, Some(&overlay_on)));
        assert!(!effective_enabled(&on, Some(&overlay_off)));
        assert!(!effective_enabled(&on, None));
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Story: disabling credentials deletes a stale credential object
    #[tokio::test]
    async fn story_disabled_deletes_existing_credential() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_app_credential()
            .returning(|_, _| Ok(Some(credential(false))));
        store
            .expect_delete_app_credential()
            .times(1)
            .returning(|_, _| Ok(()));

        let global = CredentialOverlay::default();
        let (secret, requeue) = ensure_app_credential(&store, input(&global, None, true))
            .await
            .unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::No);
    }

    /// Story: disabling with no credential present performs no writes
    #[tokio::test]
    async fn story_disabled_without_credential_is_noop() {
        let mut store = MockObjectStore::new();
        store.expect_get_app_credential().returning(|_, _| Ok(None));
        store.expect_delete_app_credential().never();

        let global = CredentialOverlay::default();
        let (secret, requeue) = ensure_app_credential(&store, input(&global, None, true))
            .await
            .unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::No);
    }

    /// Story: missing upstream inputs defer quietly without side effects
    #[tokio::test]
    async fn story_missing_inputs_defer_without_writes() {
        let mut store = MockObjectStore::new();
        store.expect_get_app_credential().returning(|_, _| Ok(None));
        store.expect_upsert_app_credential().never();

        let global = enabled_global();
        let overlay = enabled_overlay();
        let mut req = input(&global, Some(&overlay), true);
        req.service_user = "";

        let (secret, requeue) = ensure_app_credential(&store, req).await.unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::No);
    }

    /// Story: a ready credential returns its secret with no write
    #[tokio::test]
    async fn story_ready_credential_returns_secret() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_app_credential()
            .returning(|_, _| Ok(Some(credential(true))));
        store.expect_upsert_app_credential().never();

        let global = enabled_global();
        let overlay = enabled_overlay();
        let (secret, requeue) =
            ensure_app_credential(&store, input(&global, Some(&overlay), true))
                .await
                .unwrap();
        assert_eq!(secret.as_deref(), Some("identity-appcred-secret"));
        assert_eq!(requeue, Requeue::No);
    }

    /// Story: an existing but unissued credential polls with a fixed delay
    #[tokio::test]
    async fn story_pending_credential_requeues() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_app_credential()
            .returning(|_, _| Ok(Some(credential(false))));
        store.expect_upsert_app_credential().never();

        let global = enabled_global();
        let overlay = enabled_overlay();
        let (secret, requeue) =
            ensure_app_credential(&store, input(&global, Some(&overlay), true))
                .await
                .unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::after_secs(10));
    }

    /// Story: creation is deferred until the parent service is ready
    #[tokio::test]
    async fn story_creation_deferred_until_parent_ready() {
        let mut store = MockObjectStore::new();
        store.expect_get_app_credential().returning(|_, _| Ok(None));
        store.expect_upsert_app_credential().never();

        let global = enabled_global();
        let overlay = enabled_overlay();
        let (secret, requeue) =
            ensure_app_credential(&store, input(&global, Some(&overlay), false))
                .await
                .unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::No);
    }

    /// Story: a ready parent triggers creation with merged values, then polls
    #[tokio::test]
    async fn story_ready_parent_creates_credential() {
        let mut store = MockObjectStore::new();
        store.expect_get_app_credential().returning(|_, _| Ok(None));
        store
            .expect_upsert_app_credential()
            .times(1)
            .withf(|desired| {
                desired.metadata.name.as_deref() == Some("identity-appcred")
                    && desired.spec.user_name == "identity"
                    && desired.spec.expiration_days == 30
                    && desired.metadata.owner_references.as_ref().is_some_and(|o| o.len() == 1)
            })
            .returning(|_| Ok(OpResult::Created));

        let global = enabled_global();
        let overlay = enabled_overlay();
        let (secret, requeue) =
            ensure_app_credential(&store, input(&global, Some(&overlay), true))
                .await
                .unwrap();
        assert!(secret.is_none());
        assert_eq!(requeue, Requeue::after_secs(5));
    }

    /// Story: creation is idempotent — a second pass against the created
    /// but unissued object polls instead of creating a duplicate
    #[tokio::test]
    async fn story_creation_is_idempotent() {
        let mut store = MockObjectStore::new();
        let mut created = false;
        store.expect_get_app_credential().returning(move |_, _| {
            if created {
                Ok(Some(credential(false)))
            } else {
                created = true;
                Ok(None)
            }
        });
        store
            .expect_upsert_app_credential()
            .times(1)
            .returning(|_| Ok(OpResult::Created));

        let global = enabled_global();
        let overlay = enabled_overlay();

        let (_, first) = ensure_app_credential(&store, input(&global, Some(&overlay), true))
            .await
            .unwrap();
        assert_eq!(first, Requeue::after_secs(5));

        let (_, second) = ensure_app_credential(&store, input(&global, Some(&overlay), true))
            .await
            .unwrap();
        assert_eq!(second, Requeue::after_secs(10));
    }
}
