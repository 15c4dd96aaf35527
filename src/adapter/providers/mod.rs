//! Built-in provider adapters

pub mod generic;
pub mod xtream;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::config::AppConfig;
use crate::http::UpstreamClient;

pub use generic::GenericHlsAdapter;
pub use xtream::XtreamAdapter;

/// Adapters enabled by `app`, in fallback order.
///
/// The Xtream adapter needs a `base_url` and is left out without one.
pub fn builtin(app: &AppConfig, client: &UpstreamClient) -> Vec<Arc<dyn Adapter>> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();

    if app.is_enabled(generic::ID) {
        adapters.push(Arc::new(GenericHlsAdapter::new(
            client.clone(),
            app.adapter(generic::ID),
        )));
    }

    if app.is_enabled(xtream::ID) {
        match app.adapter(xtream::ID).and_then(|s| s.base_url.as_deref()) {
            Some(base_url) => adapters.push(Arc::new(XtreamAdapter::new(client.clone(), base_url))),
            None if app.adapter(xtream::ID).is_some() => {
                warn!("[adapters.{}] has no base_url, adapter disabled", xtream::ID);
            }
            None => debug!("No {} panel configured", xtream::ID),
        }
    }

    adapters
}
