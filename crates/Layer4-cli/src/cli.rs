//! Non-interactive commands

use relay_foundation::RelayConfig;
use relay_task::{Engine, OutputStream, TaskEvent, TaskPriority};
use tracing::warn;

/// Run one task to its end; `Ok(false)` when it failed or was cancelled
pub async fn run_task(
    config: &RelayConfig,
    title: &str,
    description: &str,
    priority: Option<TaskPriority>,
    contexts: Vec<String>,
) -> anyhow::Result<bool> {
    let engine = Engine::from_config(config)?;
    let init = engine.start().await;
    if !init.success {
        warn!("A required capability server is unavailable");
    }

    let orchestrator = engine.orchestrator();
    let mut events = orchestrator.watch();

    let task = orchestrator.create_task(title, description, priority).await;
    if !contexts.is_empty() {
        orchestrator.link_context(&task.id, contexts)?;
    }
    orchestrator.execute_task(&task.id)?;
    eprintln!("[{}] {}", task.id, task.title);

    let ok = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) if event.task_id() == &task.id => match event {
                    TaskEvent::Output { stream: OutputStream::Stdout, data, .. } => {
                        println!("{}", data);
                    }
                    TaskEvent::Output { stream: OutputStream::Stderr, data, .. } => {
                        eprintln!("{}", data);
                    }
                    TaskEvent::Completed { task } => {
                        let secs = task.duration().map(|d| d.as_secs_f64()).unwrap_or_default();
                        eprintln!("[{}] completed in {:.1}s", task.id, secs);
                        break true;
                    }
                    TaskEvent::Failed { task, error } => {
                        eprintln!("[{}] failed: {}", task.id, error);
                        break false;
                    }
                    TaskEvent::Cancelled { task } => {
                        eprintln!("[{}] cancelled", task.id);
                        break false;
                    }
                    TaskEvent::Started { .. } => {}
                },
                Some(_) => {}
                None => break false,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling...");
                if let Err(e) = orchestrator.cancel_task(&task.id).await {
                    warn!(error = %e, "Cancel failed");
                }
            }
        }
    };

    engine.shutdown().await;
    Ok(ok)
}

/// Print the detailed supervisor status as JSON
pub async fn show_status(config: &RelayConfig) -> anyhow::Result<()> {
    let engine = Engine::from_config(config)?;
    let init = engine.start().await;

    let status = serde_json::json!({
        "success": init.success,
        "servers": engine.supervisor().get_detailed_status(),
        "tasks": engine.orchestrator().get_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);

    engine.shutdown().await;
    Ok(())
}
