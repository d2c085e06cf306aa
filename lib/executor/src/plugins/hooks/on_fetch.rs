use std::time::Duration;

use crate::{
    context::GatewayContext, executors::error::ExecutorError,
    plugins::plugin_context::PluginRequestState,
};

/// One invocation of an underlying executor.
#[derive(Clone, Debug)]
pub struct FetchEvent {
    pub subschema_name: String,
    /// Distinct requests sent in this invocation, `1` for direct calls.
    pub batch_size: usize,
    pub batched: bool,
    pub duration: Duration,
    pub error: Option<ExecutorError>,
}

/// Notifies the plugins found in `context`, if any.
pub fn emit_fetch(context: &GatewayContext, event: &FetchEvent) {
    let state = context.get_ref_entry::<PluginRequestState>();
    if let Some(state) = state.get_ref() {
        for plugin in state.plugins.iter() {
            plugin.on_fetch(event);
        }
    }
}
