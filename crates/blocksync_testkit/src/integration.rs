//! Cross-crate integration test helpers.
//!
//! [`SyncHarness`] drives a [`SyncSession`] against a [`TestServer`] on a
//! virtual clock, mirroring the local document the way an editor would.

use crate::fixtures::{create_text, edit_content, slot_temp_id, LoopbackTransport, TestServer};
use crate::generators::EditStep;
use blocksync_engine::{
    CycleReport, DocumentApplier, EnqueueOutcome, MemoryDocument, Operation, Rollback, SyncConfig,
    SyncSession,
};
use blocksync_protocol::{BlockId, CreatePayload, TargetId, TempId, UpdatePayload};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Upper bound on cycles run by [`SyncHarness::sync_until_idle`].
pub const MAX_IDLE_CYCLES: usize = 256;

#[derive(Debug, Clone)]
struct Slot {
    temp: TempId,
    durable: Option<BlockId>,
}

impl Slot {
    fn target(&self) -> TargetId {
        match self.durable {
            Some(id) => id.into(),
            None => self.temp.clone().into(),
        }
    }
}

/// A sync session wired to an in-memory server.
pub struct SyncHarness {
    /// The server side.
    pub server: TestServer,
    /// The client session.
    pub session: SyncSession,
    /// The client document.
    pub document: MemoryDocument,
    transport: LoopbackTransport,
    now: Instant,
    slots: HashMap<usize, Slot>,
    generations: HashMap<usize, usize>,
    reports: Vec<CycleReport>,
}

impl SyncHarness {
    /// Creates a harness with a 100ms debounce and JSON bodies.
    pub fn new() -> Self {
        Self::with_config(
            SyncConfig::new("http://blocksync.test").with_debounce(Duration::from_millis(100)),
        )
    }

    /// Creates a harness with a custom session configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_server(TestServer::new(), config)
    }

    /// Creates a harness over an existing server.
    pub fn with_server(server: TestServer, config: SyncConfig) -> Self {
        let transport = server.transport(config.wire_format);
        Self {
            server,
            session: SyncSession::new(config),
            document: MemoryDocument::new(),
            transport,
            now: Instant::now(),
            slots: HashMap::new(),
            generations: HashMap::new(),
            reports: Vec::new(),
        }
    }

    /// Returns the virtual time.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Moves the virtual clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Returns every cycle report so far.
    pub fn reports(&self) -> &[CycleReport] {
        &self.reports
    }

    /// Returns the transport, for inspecting its last error.
    pub fn transport(&self) -> &LoopbackTransport {
        &self.transport
    }

    /// Enqueues an operation at the current virtual time.
    pub fn enqueue(&mut self, op: Operation) -> EnqueueOutcome {
        self.session
            .enqueue(op, self.now)
            .expect("Failed to enqueue operation")
    }

    /// Creates a text block in an empty slot.
    pub fn create(&mut self, slot: usize, content: &str) -> Option<EnqueueOutcome> {
        if self.slots.contains_key(&slot) {
            return None;
        }
        let generation = self.generations.entry(slot).or_default();
        let temp = slot_temp_id(slot, *generation);
        *generation += 1;

        let op = create_text(temp.clone(), self.server.page, content);
        self.document.insert_draft(
            temp.clone(),
            CreatePayload::new(self.server.page, "text").with_content(content),
        );
        self.slots.insert(
            slot,
            Slot {
                temp,
                durable: None,
            },
        );
        Some(self.enqueue(op))
    }

    /// Replaces the content of a slot's block.
    pub fn update(&mut self, slot: usize, content: &str) -> Option<EnqueueOutcome> {
        let target = self.slots.get(&slot)?.target();
        match &target {
            TargetId::Temp(temp) => {
                if let Some(mut draft) = self.document.draft(temp) {
                    draft.merge(UpdatePayload::new().content(content));
                    self.document.insert_draft(temp.clone(), draft);
                }
            }
            TargetId::Durable(id) => {
                if let Some(mut block) = self.document.get(*id) {
                    block.content = content.into();
                    self.document.insert(block);
                }
            }
        }
        Some(self.enqueue(edit_content(target, content)))
    }

    /// Deletes a slot's block.
    pub fn delete(&mut self, slot: usize) -> Option<EnqueueOutcome> {
        let target = self.slots.remove(&slot)?.target();
        self.document
            .apply_rollback(&Rollback::Remove(target.clone()))
            .expect("Failed to remove block locally");
        Some(self.enqueue(Operation::delete(target)))
    }

    /// Applies one script step.
    pub fn apply(&mut self, step: &EditStep) {
        match step {
            EditStep::Create { slot, content } => {
                self.create(*slot, content);
            }
            EditStep::Update { slot, content } => {
                self.update(*slot, content);
            }
            EditStep::Delete { slot } => {
                self.delete(*slot);
            }
            EditStep::Flush => {
                self.sync();
            }
        }
    }

    /// Applies a whole script, then syncs until nothing is left to send.
    pub fn run_script(&mut self, script: &[EditStep]) {
        for step in script {
            self.apply(step);
        }
        self.sync_until_idle();
    }

    /// Sends whatever is ready and reconciles the result.
    pub fn sync(&mut self) -> Option<CycleReport> {
        let report = self.session.flush_now(&self.transport, self.now)?;
        for resolution in &report.created {
            if let Some(slot) = self
                .slots
                .values_mut()
                .find(|s| s.temp == resolution.temp_id)
            {
                slot.durable = Some(resolution.durable_id());
            }
            self.document
                .apply_resolution(resolution)
                .expect("Failed to apply resolution");
        }
        for failure in &report.terminal {
            if let Some(rollback) = &failure.rollback {
                self.document
                    .apply_rollback(rollback)
                    .expect("Failed to apply rollback");
            }
        }
        self.reports.push(report.clone());
        Some(report)
    }

    /// Syncs, waiting out backoff on the virtual clock, until the queue is
    /// empty. Returns the number of cycles run.
    pub fn sync_until_idle(&mut self) -> usize {
        let mut cycles = 0;
        while !self.session.queue().is_empty() && cycles < MAX_IDLE_CYCLES {
            if self.sync().is_some() {
                cycles += 1;
                continue;
            }
            match self.session.next_deadline() {
                Some(deadline) if deadline > self.now => self.now = deadline,
                _ => break,
            }
        }
        cycles
    }

    /// Returns the durable id of a slot's block, once acknowledged.
    pub fn durable_id(&self, slot: usize) -> Option<BlockId> {
        self.slots.get(&slot).and_then(|s| s.durable)
    }

    /// Returns the server-side content of every live slot.
    pub fn server_contents(&self) -> BTreeMap<usize, String> {
        self.slots
            .iter()
            .filter_map(|(slot, s)| {
                let block = self.server.block(s.durable?)?;
                Some((*slot, block.content))
            })
            .collect()
    }

    /// Returns the local content of every live slot.
    pub fn local_contents(&self) -> BTreeMap<usize, String> {
        self.slots
            .iter()
            .filter_map(|(slot, s)| {
                let content = match s.durable {
                    Some(id) => self.document.get(id)?.content,
                    None => self.document.draft(&s.temp)?.content,
                };
                Some((*slot, content))
            })
            .collect()
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}
