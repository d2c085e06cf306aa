use std::sync::Arc;

use crate::plugins::plugin_trait::GatewayPluginBoxed;

/// The plugins of the gateway serving a request, stored in its [`crate::context::GatewayContext`].
#[derive(Clone)]
pub struct PluginRequestState {
    pub plugins: Arc<Vec<GatewayPluginBoxed>>,
}

impl PluginRequestState {
    pub fn new(plugins: Arc<Vec<GatewayPluginBoxed>>) -> Self {
        PluginRequestState { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
