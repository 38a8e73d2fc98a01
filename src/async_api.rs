use crate::session::{SessionJob, SessionOrchestrator};
use crate::{Error, Result};

/// An async-friendly front for the blocking session pipeline.
///
/// Each job runs on tokio's blocking pool. The blocking task is detached from
/// the awaiting future: if the caller goes away mid-request the session still
/// runs to its end, so its context and page are always released.
#[derive(Clone)]
pub struct AsyncOrchestrator {
    inner: SessionOrchestrator,
}

impl AsyncOrchestrator {
    pub fn new(inner: SessionOrchestrator) -> Self {
        Self { inner }
    }

    /// Run a job and wait for the encoded image.
    pub async fn run(&self, job: SessionJob) -> Result<Vec<u8>> {
        let orchestrator = self.inner.clone();
        let worker = tokio::task::spawn_blocking(move || orchestrator.run(&job));

        match worker.await {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(Error::Internal("session worker panicked".into())),
            Err(e) => Err(Error::Other(format!("Session worker canceled: {}", e))),
        }
    }
}

/// Launch the shared engine on a dedicated thread and wait for it.
///
/// Chrome startup blocks for a while; doing it off the reactor keeps the
/// runtime responsive (signal handling in particular) during startup.
#[cfg(feature = "cdp")]
pub async fn launch_engine(config: crate::EngineConfig) -> Result<crate::cdp::CdpEngine> {
    let (init_tx, init_rx) = tokio::sync::oneshot::channel();

    std::thread::spawn(move || {
        let _ = init_tx.send(crate::cdp::CdpEngine::launch(config));
    });

    init_rx
        .await
        .map_err(|e| Error::InitializationError(format!("Engine launch canceled: {}", e)))?
}
