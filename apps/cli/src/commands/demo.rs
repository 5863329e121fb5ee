//! Demo command implementation.

use std::sync::Arc;

use conflux_dispatch::DispatchManager;
use conflux_workflow::{DispatchTask, Group, UnitOfWork, Workflow, WorkflowState, outputs};
use tracing::info;

use crate::echo::EchoBackend;

/// Execute the demo command.
///
/// Runs a parallel gathering stage followed by a dispatch stage and prints
/// the workflow report as JSON.
pub async fn execute(fail_primary: bool) -> anyhow::Result<()> {
    let manager = Arc::new(manager(fail_primary).await?);
    let workflow = build_workflow(manager)?;

    let state = workflow.start().await;
    info!(state = %state, "Demo workflow finished");

    println!("{}", workflow.report().to_json()?);

    if let WorkflowState::Failed(err) = state {
        anyhow::bail!("demo workflow failed: {}", err);
    }
    Ok(())
}

async fn manager(fail_primary: bool) -> anyhow::Result<DispatchManager> {
    let primary = if fail_primary { EchoBackend::new("primary").failing() } else { EchoBackend::new("primary") };

    let manager = DispatchManager::new().with_default_fallback("backup");
    manager.register("primary", Arc::new(primary), None, 0.05).await?;
    manager.register("backup", Arc::new(EchoBackend::new("backup")), Some(4096), 0.1).await?;
    manager.set_active("primary").await?;
    Ok(manager)
}

fn build_workflow(manager: Arc<DispatchManager>) -> anyhow::Result<Workflow> {
    let gather = Group::parallel("Gather")
        .with_description("Collect prompt ingredients")
        .add(UnitOfWork::from_fn("Topic", |_inputs, _ctx| async {
            Ok(outputs([("subject", "structured concurrency")]))
        }))
        .add(UnitOfWork::from_fn("Audience", |_inputs, _ctx| async {
            Ok(outputs([("reader", "new contributors")]))
        }));

    let ask = UnitOfWork::new("Ask", DispatchTask::new(manager))
        .with_description("Dispatch the assembled prompt")
        .with_input("prompt", "Explain {Topic.subject} to {Audience.reader}.")
        .with_input("max_output_tokens", 256)
        .with_max_retries(1);

    Ok(Workflow::builder("demo")
        .description("Two-stage demonstration workflow")
        .add(gather)
        .add(ask)
        .build()?)
}
