//! Controller runner - builds controller futures for the Nimbus CRDs
//!
//! Each `build_*` function returns boxed futures the caller composes;
//! controller construction stays pure and testable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use nimbus_common::crd::{NimbusControlPlane, NimbusVersion};

use crate::controller::{
    error_policy, reconcile, reconcile_version, version_error_policy, Context,
};
use crate::store::KubeObjectStore;

/// Watcher timeout (seconds) - must be less than the client read timeout
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the control-plane and version controller futures
pub fn build_controllers(client: Client) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let ctx = Arc::new(Context::new(Arc::new(KubeObjectStore::new(client.clone()))));

    let planes: Api<NimbusControlPlane> = Api::all(client.clone());
    let versions: Api<NimbusVersion> = Api::all(client);

    tracing::info!("- NimbusControlPlane controller");
    tracing::info!("- NimbusVersion controller");

    let plane_ctrl = Controller::new(
        planes,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx.clone())
    .for_each(log_reconcile_result("ControlPlane"));

    let version_ctrl = Controller::new(
        versions,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_version, version_error_policy, ctx)
    .for_each(log_reconcile_result("Version"));

    vec![Box::pin(plane_ctrl), Box::pin(version_ctrl)]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
