use crate::plugins::hooks::{
    on_fetch::FetchEvent,
    on_subgraph_execute::{OnSubgraphExecuteStartHookPayload, OnSubgraphExecuteStartHookResult},
};

/// Observes the calls the gateway makes to its subschemas.
///
/// Plugins run in registration order. None of them is required for a request to succeed.
#[async_trait::async_trait]
pub trait GatewayPlugin: Send + Sync + 'static {
    fn plugin_name(&self) -> &'static str;

    /// Called before each delegated call. The returned control flow decides whether the
    /// call proceeds, is answered by the plugin, or is observed once it ends.
    #[inline]
    async fn on_subgraph_execute<'exec>(
        &'exec self,
        start_payload: OnSubgraphExecuteStartHookPayload<'exec>,
    ) -> OnSubgraphExecuteStartHookResult<'exec> {
        start_payload.proceed()
    }

    /// Called once per invocation of an underlying executor, batched or not.
    #[inline]
    fn on_fetch(&self, _event: &FetchEvent) {}
}

pub type GatewayPluginBoxed = Box<dyn GatewayPlugin>;
