//! Prometheus metrics recorder.
//!
//! Watchers record through the `metrics` facade. Nothing is kept unless a
//! recorder is installed; [`install_prometheus`] installs one whose
//! [`PrometheusHandle`] renders the text exposition format on demand.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder.
///
/// No HTTP listener is started; call [`PrometheusHandle::render`] to read
/// the current values.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })
}
