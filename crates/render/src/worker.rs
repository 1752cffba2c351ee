//! Background render worker: one thread per session fed by a command queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tokio::sync::oneshot;

use crate::error::RenderError;
use crate::session::{RenderRequest, RenderResponse, SessionCore};

type RenderResult = Result<RenderResponse, RenderError>;

/// Shared flag that aborts a queued render before it reaches the engine.
///
/// Once the blocking engine call has started the render runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pending result of [`RenderSession::render_async`](crate::RenderSession::render_async).
///
/// Await it from async code or call [`RenderTask::wait`] from a plain thread.
#[derive(Debug)]
pub struct RenderTask {
    rx: oneshot::Receiver<RenderResult>,
    cancel: CancellationToken,
}

impl RenderTask {
    fn ready(result: RenderResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Request cancellation; effective only if the engine call has not started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block the current thread until the render finishes.
    ///
    /// Must not be called from inside an async runtime; await the task there.
    pub fn wait(self) -> RenderResult {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(RenderError::WorkerGone))
    }
}

impl Future for RenderTask {
    type Output = RenderResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(RenderError::WorkerGone)))
    }
}

struct Job {
    request: RenderRequest,
    cancel: CancellationToken,
    reply: oneshot::Sender<RenderResult>,
}

enum WorkerCommand {
    Render(Job),
    Stop,
}

/// Handle to the session's render thread.
pub(crate) struct RenderWorker {
    tx: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    pub(crate) fn spawn(core: Arc<SessionCore>) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("sunrise-render".into())
            .spawn(move || worker_loop(core, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, request: RenderRequest) -> RenderTask {
        let (reply, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let job = Job {
            request,
            cancel: cancel.clone(),
            reply,
        };
        if self.tx.send(WorkerCommand::Render(job)).is_err() {
            return RenderTask::ready(Err(RenderError::WorkerGone));
        }
        RenderTask { rx, cancel }
    }

    /// Finish queued jobs, then stop and join the thread.
    pub(crate) fn stop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("render worker panicked");
            }
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn failed_task(error: RenderError) -> RenderTask {
    RenderTask::ready(Err(error))
}

fn worker_loop(core: Arc<SessionCore>, rx: Receiver<WorkerCommand>) {
    tracing::debug!("render worker started");
    while let Ok(command) = rx.recv() {
        match command {
            WorkerCommand::Render(job) => {
                let result = core.render(&job.request, &job.cancel);
                // The caller may have dropped the task.
                let _ = job.reply.send(result);
            }
            WorkerCommand::Stop => break,
        }
    }
    tracing::debug!("render worker stopped");
}
