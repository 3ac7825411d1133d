//! The tokio event loop around a [`SyncSession`].
//!
//! One task owns the session. Callers talk to it through a cloneable
//! [`SyncHandle`]; the only concurrent work is the transport call, which
//! runs on the blocking pool while the loop keeps accepting edits.

use crate::error::{SyncError, SyncResult};
use crate::operation::Operation;
use crate::reconcile::CycleReport;
use crate::remote::DocumentApplier;
use crate::session::{BatchId, SyncSession, SyncStats};
use crate::transport::BatchTransport;
use blocksync_protocol::{BatchSyncRequest, BatchSyncResponse, OpId, RemoteChange, TempId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives the outcome of every flush cycle.
///
/// Called on the driver task; implementations must not block.
pub trait SyncObserver: Send + Sync + 'static {
    /// Called after each batch is reconciled.
    fn on_cycle(&self, report: &CycleReport);

    /// Called when an edit sent through a [`SyncHandle`] was rejected.
    fn on_rejected(&self, _op: &Operation, _error: &SyncError) {}
}

impl<O: SyncObserver> SyncObserver for Arc<O> {
    fn on_cycle(&self, report: &CycleReport) {
        (**self).on_cycle(report);
    }

    fn on_rejected(&self, op: &Operation, error: &SyncError) {
        (**self).on_rejected(op, error);
    }
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_cycle(&self, _report: &CycleReport) {}
}

enum Command {
    Enqueue(Operation),
    Dequeue(OpId, oneshot::Sender<SyncResult<Vec<Operation>>>),
    Flush,
    ApplyRemote(RemoteChange),
    Forget(TempId),
    Stats(oneshot::Sender<SyncStats>),
    Shutdown(oneshot::Sender<Vec<Operation>>),
}

/// Handle to a running [`SyncDriver`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Enqueue(_) => "Enqueue",
            Command::Dequeue(..) => "Dequeue",
            Command::Flush => "Flush",
            Command::ApplyRemote(_) => "ApplyRemote",
            Command::Forget(_) => "Forget",
            Command::Stats(_) => "Stats",
            Command::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SyncHandle {
    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Closed)
    }

    /// Queues a local edit. Never waits for the network.
    ///
    /// Rejections are reported to [`SyncObserver::on_rejected`].
    pub fn enqueue(&self, op: Operation) -> SyncResult<()> {
        self.send(Command::Enqueue(op))
    }

    /// Requests a flush without waiting for the debounce window.
    pub fn flush(&self) -> SyncResult<()> {
        self.send(Command::Flush)
    }

    /// Applies a server-pushed change to the document.
    pub fn apply_remote(&self, change: RemoteChange) -> SyncResult<()> {
        self.send(Command::ApplyRemote(change))
    }

    /// Drops the resolution for a temporary id the host no longer uses.
    pub fn forget(&self, temp: TempId) -> SyncResult<()> {
        self.send(Command::Forget(temp))
    }

    /// Removes a pending operation.
    pub async fn dequeue(&self, id: OpId) -> SyncResult<Vec<Operation>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Dequeue(id, reply))?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Returns the session statistics.
    pub async fn stats(&self) -> SyncResult<SyncStats> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        response.await.map_err(|_| SyncError::Closed)
    }

    /// Stops the driver after one last flush and returns the operations
    /// that could not be delivered.
    pub async fn shutdown(&self) -> SyncResult<Vec<Operation>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        response.await.map_err(|_| SyncError::Closed)
    }
}

struct InFlightSend {
    batch: BatchId,
    task: JoinHandle<SyncResult<BatchSyncResponse>>,
}

enum Event {
    Command(Option<Command>),
    Sent(SyncResult<BatchSyncResponse>),
    Tick,
}

/// Runs a [`SyncSession`] on a tokio task.
pub struct SyncDriver<T, A, O = NoopObserver> {
    session: SyncSession,
    transport: Arc<T>,
    document: Arc<A>,
    observer: O,
}

impl<T, A, O> SyncDriver<T, A, O>
where
    T: BatchTransport + 'static,
    A: DocumentApplier + 'static,
    O: SyncObserver,
{
    /// Creates a driver.
    pub fn new(session: SyncSession, transport: Arc<T>, document: Arc<A>, observer: O) -> Self {
        Self {
            session,
            transport,
            document,
            observer,
        }
    }

    /// Spawns the event loop on the current runtime.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(receiver));
        (SyncHandle { commands }, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(base_url = %self.session.config().base_url, "sync driver started");
        let mut in_flight: Option<InFlightSend> = None;

        let reply = loop {
            if in_flight.is_none() {
                if let Some(batch) = self.session.poll_batch(Instant::now()) {
                    in_flight = Some(InFlightSend {
                        batch: batch.id,
                        task: self.send_in_background(batch.request),
                    });
                }
            }

            let deadline = self.session.next_deadline();
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                result = wait_for_send(&mut in_flight), if in_flight.is_some() => Event::Sent(result),
                _ = sleep_until(deadline) => Event::Tick,
            };

            match event {
                Event::Command(None) => break None,
                Event::Command(Some(Command::Shutdown(reply))) => break Some(reply),
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Sent(result) => {
                    if let Some(send) = in_flight.take() {
                        self.finish(send.batch, result);
                    }
                }
                Event::Tick => {}
            }
        };

        if in_flight.is_some() {
            let result = wait_for_send(&mut in_flight).await;
            if let Some(send) = in_flight.take() {
                self.finish(send.batch, result);
            }
        }
        self.final_flush().await;

        let remaining = self.session.close();
        if let Err(e) = self.transport.close() {
            warn!(error = %e, "failed to close transport");
        }
        info!(remaining = remaining.len(), "sync driver stopped");
        if let Some(reply) = reply {
            let _ = reply.send(remaining);
        }
    }

    fn handle_command(&mut self, command: Command) {
        debug!(command = ?command, "sync command");
        match command {
            Command::Enqueue(op) => {
                let rejected = op.clone();
                if let Err(e) = self.session.enqueue(op, Instant::now()) {
                    warn!(op_id = %rejected.id(), error = %e, "operation rejected");
                    self.observer.on_rejected(&rejected, &e);
                }
            }
            Command::Dequeue(id, reply) => {
                let _ = reply.send(self.session.dequeue(id));
            }
            Command::Flush => {
                self.session.flush();
            }
            Command::ApplyRemote(change) => {
                if let Err(e) = self.session.apply_remote(self.document.as_ref(), change) {
                    warn!(error = %e, "failed to apply remote change");
                }
            }
            Command::Forget(temp) => {
                self.session.forget(&temp);
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.session.stats().clone());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn send_in_background(&self, request: BatchSyncRequest) -> JoinHandle<SyncResult<BatchSyncResponse>> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.session.config().timeout;
        tokio::spawn(async move {
            let call = tokio::task::spawn_blocking(move || transport.send(&request));
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(SyncError::transport_retryable(format!("transport task failed: {e}"))),
                Err(_) => Err(SyncError::Timeout),
            }
        })
    }

    fn finish(&mut self, batch: BatchId, result: SyncResult<BatchSyncResponse>) {
        let report = self.session.complete(batch, result, Instant::now());
        for resolution in &report.created {
            if let Err(e) = self.document.apply_resolution(resolution) {
                warn!(temp_id = %resolution.temp_id, error = %e, "failed to apply resolution");
            }
        }
        for failure in &report.terminal {
            if let Some(rollback) = &failure.rollback {
                if let Err(e) = self.document.apply_rollback(rollback) {
                    warn!(op_id = %failure.op_id, error = %e, "failed to roll back");
                }
            }
        }
        self.observer.on_cycle(&report);
    }

    /// One best-effort flush of whatever is ready, bounded by the timeout.
    async fn final_flush(&mut self) {
        if !self.session.flush() {
            return;
        }
        let Some(batch) = self.session.poll_batch(Instant::now()) else {
            return;
        };
        debug!(batch = %batch.id, operations = batch.operations.len(), "final flush");
        let mut send = Some(InFlightSend {
            batch: batch.id,
            task: self.send_in_background(batch.request),
        });
        let result = wait_for_send(&mut send).await;
        self.finish(batch.id, result);
    }
}

async fn wait_for_send(in_flight: &mut Option<InFlightSend>) -> SyncResult<BatchSyncResponse> {
    match in_flight {
        Some(send) => match (&mut send.task).await {
            Ok(result) => result,
            Err(e) => Err(SyncError::transport_retryable(format!("transport task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::MemoryDocument;
    use crate::transport::MockTransport;
    use blocksync_protocol::{BlockId, CreatePayload, PageId, TempId, UpdatePayload};
    use parking_lot::Mutex;
    use std::time::Duration;

    const TEST_WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Recorder {
        cycles: Mutex<Vec<CycleReport>>,
        rejected: Mutex<Vec<SyncError>>,
    }

    impl SyncObserver for Recorder {
        fn on_cycle(&self, report: &CycleReport) {
            self.cycles.lock().push(report.clone());
        }

        fn on_rejected(&self, _op: &Operation, error: &SyncError) {
            self.rejected.lock().push(error.clone());
        }
    }

    fn driver(
        transport: Arc<MockTransport>,
        document: Arc<MemoryDocument>,
        observer: Arc<Recorder>,
    ) -> (SyncHandle, JoinHandle<()>) {
        let config = SyncConfig::new("http://test").with_debounce(Duration::from_millis(20));
        SyncDriver::new(SyncSession::new(config), transport, document, observer).spawn()
    }

    #[tokio::test]
    async fn flushes_after_debounce_and_resolves_ids() {
        let transport = Arc::new(MockTransport::auto_ack());
        let document = Arc::new(MemoryDocument::new());
        let observer = Arc::new(Recorder::default());
        let (handle, task) = driver(transport.clone(), document.clone(), observer.clone());

        let temp = TempId::new("t-1").unwrap();
        document.insert_draft(temp.clone(), CreatePayload::new(PageId::new(), "text"));
        handle
            .enqueue(Operation::create(temp.clone(), CreatePayload::new(PageId::new(), "text")))
            .unwrap();

        tokio::time::timeout(TEST_WAIT, async {
            while observer.cycles.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let report = observer.cycles.lock()[0].clone();
        let durable = report.resolved(&temp).unwrap();
        assert!(document.get(durable).is_some());
        assert_eq!(document.draft_count(), 0);

        let remaining = handle.shutdown().await.unwrap();
        assert!(remaining.is_empty());
        task.await.unwrap();
        assert_eq!(transport.request_count(), 1);
    }

    async fn wait_for_cycles(observer: &Recorder, count: usize) {
        tokio::time::timeout(TEST_WAIT, async {
            while observer.cycles.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn edits_by_temp_id_after_ack_reach_the_durable_block() {
        let transport = Arc::new(MockTransport::auto_ack());
        let observer = Arc::new(Recorder::default());
        let (handle, task) = driver(
            transport.clone(),
            Arc::new(MemoryDocument::new()),
            observer.clone(),
        );

        let temp = TempId::new("t-1").unwrap();
        handle
            .enqueue(Operation::create(temp.clone(), CreatePayload::new(PageId::new(), "text")))
            .unwrap();
        wait_for_cycles(&observer, 1).await;
        let durable = observer.cycles.lock()[0].resolved(&temp).unwrap();

        handle
            .enqueue(Operation::update(temp.clone(), UpdatePayload::new().content("late")))
            .unwrap();
        handle.flush().unwrap();
        wait_for_cycles(&observer, 2).await;
        assert!(observer.rejected.lock().is_empty());
        assert_eq!(transport.requests()[1].updates[0].id, durable.to_string());

        handle.forget(temp.clone()).unwrap();
        handle
            .enqueue(Operation::update(temp.clone(), UpdatePayload::new().content("x")))
            .unwrap();
        handle.stats().await.unwrap();
        assert_eq!(
            observer.rejected.lock().clone(),
            vec![SyncError::UnknownTempId(temp)]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_edits() {
        let transport = Arc::new(MockTransport::auto_ack());
        let observer = Arc::new(Recorder::default());
        let (handle, task) = driver(
            transport.clone(),
            Arc::new(MemoryDocument::new()),
            observer.clone(),
        );

        handle
            .enqueue(Operation::update(BlockId::new(), UpdatePayload::new().content("x")))
            .unwrap();
        let remaining = handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(remaining.is_empty());
        assert_eq!(transport.request_count(), 1);
        assert_eq!(observer.cycles.lock().len(), 1);
        assert!(matches!(handle.flush(), Err(SyncError::Closed)));
    }

    #[tokio::test]
    async fn rejected_edits_reach_the_observer() {
        let transport = Arc::new(MockTransport::auto_ack());
        let observer = Arc::new(Recorder::default());
        let (handle, task) = driver(transport, Arc::new(MemoryDocument::new()), observer.clone());

        let ghost = TempId::new("ghost").unwrap();
        handle
            .enqueue(Operation::update(ghost.clone(), UpdatePayload::new().content("x")))
            .unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.operations_sent, 0);
        assert_eq!(
            observer.rejected.lock().clone(),
            vec![SyncError::UnknownTempId(ghost)]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn undeliverable_edits_are_returned_on_shutdown() {
        let transport = Arc::new(MockTransport::new());
        transport.set_connected(false);
        let observer = Arc::new(Recorder::default());
        let (handle, task) = driver(transport, Arc::new(MemoryDocument::new()), observer);

        let op = Operation::delete(BlockId::new());
        let id = op.id();
        handle.enqueue(op).unwrap();
        handle.flush().unwrap();

        let remaining = handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), id);
        assert_eq!(remaining[0].retry_count(), 1);
    }
}
