//! Ctrl-C handling for the long-running commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Run a blocking loop on the blocking pool until it returns or Ctrl-C
/// is pressed. On Ctrl-C the stop flag is set and the loop is awaited.
pub async fn run_until_interrupted<F>(body: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<AtomicBool>) -> anyhow::Result<()> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let mut handle = tokio::task::spawn_blocking({
        let stop = Arc::clone(&stop);
        move || body(stop)
    });

    tokio::select! {
        finished = &mut handle => return finished?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received, shutting down");
            stop.store(true, Ordering::Relaxed);
        }
    }
    handle.await?
}
