//! Request-scoped node context.
//!
//! The executor tags each node's progress and output callbacks with the
//! node identity and installs them in a task-local slot before running the
//! installer. Downstream code reports through the free functions here at
//! its suspension points without threading callbacks through every
//! signature; outside an apply they are no-ops.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::event::NodeId;

type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;
type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

tokio::task_local! {
    static NODE: NodeContext;
}

/// Callbacks and cancellation handle for one node.
#[derive(Clone)]
pub struct NodeContext {
    node: NodeId,
    progress: ProgressFn,
    output: OutputFn,
    cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(
        node: NodeId,
        progress: ProgressFn,
        output: OutputFn,
        cancel: CancellationToken,
    ) -> Self {
        Self { node, progress, output, cancel }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext").field("node", &self.node).finish_non_exhaustive()
    }
}

/// Runs `fut` with `ctx` installed as the current node context.
pub async fn scope<F>(ctx: NodeContext, fut: F) -> F::Output
where
    F: std::future::Future,
{
    NODE.scope(ctx, fut).await
}

/// Reports download progress for the current node, if any.
pub fn report_progress(downloaded: u64, total: u64) {
    let _ = NODE.try_with(|ctx| (ctx.progress)(downloaded, total));
}

/// Reports one line of subprocess or installer output for the current
/// node, if any.
pub fn report_output(line: &str) {
    let _ = NODE.try_with(|ctx| (ctx.output)(line));
}

/// The cancellation token of the current node. Outside an apply this is a
/// fresh token that never fires.
pub fn cancel_token() -> CancellationToken {
    NODE.try_with(|ctx| ctx.cancel.clone()).unwrap_or_default()
}

/// Whether the current node has been cancelled.
pub fn is_cancelled() -> bool {
    NODE.try_with(|ctx| ctx.cancel.is_cancelled()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;
    use std::sync::Mutex;

    #[tokio::test]
    async fn callbacks_reach_the_scoped_context() {
        let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let ctx = NodeContext::new(
            NodeId::new(Kind::Tool, "rg"),
            Arc::new(move |d, t| seen_clone.lock().unwrap().push((d, t))),
            Arc::new(|_| {}),
            CancellationToken::new(),
        );
        scope(ctx, async {
            report_progress(1, 10);
            report_progress(10, 10);
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![(1, 10), (10, 10)]);
    }

    #[tokio::test]
    async fn reporting_outside_any_scope_is_a_noop() {
        report_progress(1, 2);
        report_output("ignored");
        assert!(!is_cancelled());
    }
}
