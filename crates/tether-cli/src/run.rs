//! Cell evaluation commands.
//!
//! The kernel is synchronous; cells run on a blocking task while the async
//! side listens for Ctrl-C and raises the kernel's interrupt flag.

use std::path::PathBuf;

use anyhow::Context;
use tether_core::{ExecuteReply, Kernel};
use tokio::io::AsyncReadExt;

/// Evaluate each file as one cell, in order.
pub async fn files(kernel: Kernel, files: &[PathBuf], silent: bool) -> anyhow::Result<()> {
    let mut cells = Vec::with_capacity(files.len());
    for path in files {
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        cells.push(code);
    }
    execute(kernel, cells, silent).await
}

/// Evaluate one cell given inline, or read from stdin when absent.
pub async fn eval(kernel: Kernel, code: Option<String>, silent: bool) -> anyhow::Result<()> {
    let code = match code {
        Some(code) => code,
        None => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("failed to read cell from stdin")?;
            code
        }
    };
    execute(kernel, vec![code], silent).await
}

async fn execute(mut kernel: Kernel, cells: Vec<String>, silent: bool) -> anyhow::Result<()> {
    let interrupt = kernel.interrupt_handle();
    let listener = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received, interrupting");
            interrupt.interrupt();
        }
    });

    let replies = tokio::task::spawn_blocking(move || {
        cells
            .iter()
            .map(|code| kernel.execute(code, silent))
            .collect::<Vec<ExecuteReply>>()
    })
    .await
    .context("cell evaluation task failed")?;
    listener.abort();

    for reply in &replies {
        tracing::debug!(
            status = reply.status,
            execution_count = reply.execution_count,
            "cell finished"
        );
    }
    Ok(())
}
