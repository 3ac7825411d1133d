//! Simulate command implementation.
//!
//! Replays an edit script through a [`SyncSession`] talking to an in-memory
//! server over the loopback transport. Time is virtual: `wait` steps jump
//! straight to each debounce or retry deadline they cover.

use super::read_json;
use blocksync_engine::{
    deadline_after, BatchTransport, CycleReport, DocumentApplier, HttpError, HttpTransport,
    LoopbackClient, LoopbackServer, MemoryDocument, Operation, Rollback, SyncConfig, SyncSession,
    SyncStats,
};
use blocksync_protocol::{Block, BlockId, CreatePayload, PageId, TargetId, TempId, UpdatePayload};
use blocksync_server::{BlockStore, MemoryBlockStore, ServerConfig, SyncServer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on batches sent while draining the queue at the end.
const MAX_DRAIN_CYCLES: usize = 1024;

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Create a block in an empty slot.
    Create {
        /// Slot index.
        slot: usize,
        /// Initial content.
        #[serde(default)]
        content: String,
        /// Block type name.
        #[serde(default = "default_block_type")]
        block_type: String,
    },
    /// Replace the content of a slot's block.
    Update {
        /// Slot index.
        slot: usize,
        /// New content.
        content: String,
    },
    /// Delete a slot's block.
    Delete {
        /// Slot index.
        slot: usize,
    },
    /// Flush without waiting for the debounce window.
    Flush,
    /// Let virtual time pass.
    Wait {
        /// Milliseconds to wait.
        ms: u64,
    },
    /// Take the server's store down or bring it back.
    Outage {
        /// Whether the store is unavailable.
        down: bool,
    },
}

fn default_block_type() -> String {
    "text".into()
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Virtual milliseconds since the simulation started.
    pub at_ms: u64,
    /// Blocks created.
    pub created: usize,
    /// Blocks updated.
    pub updated: usize,
    /// Blocks deleted.
    pub deleted: usize,
    /// Operations scheduled for another attempt.
    pub retrying: usize,
    /// Operations dropped.
    pub dropped: usize,
    /// Whole-batch failure, if any.
    pub transport_error: Option<String>,
}

#[derive(Clone)]
struct ServerLink(Arc<SyncServer>);

impl LoopbackServer for ServerLink {
    fn handle_post(&self, path: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, HttpError> {
        self.0
            .handle_post(path, content_type, body)
            .map_err(|e| HttpError::status(e.status_code(), e.to_string()))
    }
}

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

/// A sync session wired to an in-memory server on a virtual clock.
pub struct Simulation {
    session: SyncSession,
    server: Arc<SyncServer>,
    store: Arc<MemoryBlockStore>,
    transport: HttpTransport<LoopbackClient<ServerLink>>,
    document: MemoryDocument,
    page: PageId,
    started: Instant,
    now: Instant,
    slots: BTreeMap<usize, Slot>,
    next_temp: u64,
    cycles: Vec<CycleSummary>,
}

impl Simulation {
    /// Creates a simulation with one empty page.
    pub fn new(config: SyncConfig) -> Self {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let page = PageId::new();
        store.add_page(page);
        let server = Arc::new(SyncServer::with_store(ServerConfig::default(), store.clone()));
        let transport = HttpTransport::new(
            config.base_url.clone(),
            LoopbackClient::new(ServerLink(Arc::clone(&server))),
        )
        .with_format(config.wire_format);
        let now = Instant::now();
        Self {
            session: SyncSession::new(config),
            server,
            store,
            transport,
            document: MemoryDocument::new(),
            page,
            started: now,
            now,
            slots: BTreeMap::new(),
            next_temp: 0,
            cycles: Vec::new(),
        }
    }

    /// Returns the summary of every cycle so far.
    pub fn cycles(&self) -> &[CycleSummary] {
        &self.cycles
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> &SyncStats {
        self.session.stats()
    }

    /// Returns the virtual time elapsed.
    pub fn elapsed(&self) -> Duration {
        self.now - self.started
    }

    /// Returns the number of operations not yet acknowledged.
    pub fn unsent(&self) -> usize {
        self.session.queue().len()
    }

    /// Applies one script step.
    pub fn apply(&mut self, step: &ScriptStep) -> Result<(), Box<dyn std::error::Error>> {
        match step {
            ScriptStep::Create {
                slot,
                content,
                block_type,
            } => self.create(*slot, content, block_type)?,
            ScriptStep::Update { slot, content } => self.update(*slot, content)?,
            ScriptStep::Delete { slot } => self.delete(*slot)?,
            ScriptStep::Flush => {
                self.session.flush();
            }
            ScriptStep::Wait { ms } => self.wait(Duration::from_millis(*ms))?,
            ScriptStep::Outage { down } => {
                debug!(down, "store availability changed");
                self.store.set_unavailable(*down);
            }
        }
        self.pump()
    }

    /// Applies every step, then waits until the queue drains.
    pub fn run(&mut self, steps: &[ScriptStep]) -> Result<(), Box<dyn std::error::Error>> {
        for step in steps {
            self.apply(step)?;
        }
        self.drain()
    }

    fn create(
        &mut self,
        slot: usize,
        content: &str,
        block_type: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.slots.contains_key(&slot) {
            warn!(slot, "slot already holds a block, skipping create");
            return Ok(());
        }
        let temp = TempId::new(format!("sim-{}", self.next_temp))?;
        self.next_temp += 1;

        let payload = CreatePayload::new(self.page, block_type)
            .with_content(content)
            .with_position(slot as i64);
        self.document.insert_draft(temp.clone(), payload.clone());
        self.session
            .enqueue(Operation::create(temp.clone(), payload), self.now)?;
        self.slots.insert(
            slot,
            Slot {
                temp,
                durable: None,
            },
        );
        Ok(())
    }

    fn update(&mut self, slot: usize, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(target) = self.slots.get(&slot).map(Slot::target) else {
            warn!(slot, "slot is empty, skipping update");
            return Ok(());
        };
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
        self.session.enqueue(
            Operation::update(target, UpdatePayload::new().content(content)),
            self.now,
        )?;
        Ok(())
    }

    fn delete(&mut self, slot: usize) -> Result<(), Box<dyn std::error::Error>> {
        let Some(target) = self.slots.remove(&slot).map(|s| s.target()) else {
            warn!(slot, "slot is empty, skipping delete");
            return Ok(());
        };
        self.document
            .apply_rollback(&Rollback::Remove(target.clone()))?;
        self.session.enqueue(Operation::delete(target), self.now)?;
        Ok(())
    }

    /// Sends every batch that is due at the current virtual time.
    fn pump(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        while let Some(batch) = self.session.poll_batch(self.now) {
            let result = self.transport.send(&batch.request);
            let report = self.session.complete(batch.id, result, self.now);
            self.reconcile(&report)?;
        }
        Ok(())
    }

    fn wait(&mut self, duration: Duration) -> Result<(), Box<dyn std::error::Error>> {
        let until = deadline_after(self.now, duration);
        loop {
            self.pump()?;
            match self.session.next_deadline() {
                Some(deadline) if deadline > self.now && deadline <= until => self.now = deadline,
                _ => break,
            }
        }
        self.now = until;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut rounds = 0;
        while !self.session.queue().is_empty() && rounds < MAX_DRAIN_CYCLES {
            self.pump()?;
            match self.session.next_deadline() {
                Some(deadline) if deadline > self.now => self.now = deadline,
                _ => break,
            }
            rounds += 1;
        }
        Ok(())
    }

    fn reconcile(&mut self, report: &CycleReport) -> Result<(), Box<dyn std::error::Error>> {
        for resolution in &report.created {
            if let Some(slot) = self
                .slots
                .values_mut()
                .find(|s| s.temp == resolution.temp_id)
            {
                slot.durable = Some(resolution.durable_id());
                self.session.forget(&resolution.temp_id);
            }
            self.document.apply_resolution(resolution)?;
        }
        for failure in &report.terminal {
            warn!(
                op_id = %failure.op_id,
                target = %failure.target,
                error = %failure.error,
                "operation dropped"
            );
            if let Some(rollback) = &failure.rollback {
                self.document.apply_rollback(rollback)?;
                if let Rollback::Remove(TargetId::Temp(temp)) = rollback {
                    self.slots.retain(|_, s| &s.temp != temp);
                }
            }
        }

        self.cycles.push(CycleSummary {
            at_ms: self.elapsed().as_millis() as u64,
            created: report.created.len(),
            updated: report.updated.len(),
            deleted: report.deleted.len(),
            retrying: report.retrying.len(),
            dropped: report.terminal.len(),
            transport_error: report.transport_error.as_ref().map(|e| e.to_string()),
        });
        Ok(())
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

    /// Returns the live blocks the server holds for the page.
    pub fn server_blocks(&self) -> Vec<Block> {
        self.store.list_by_page(self.page).unwrap_or_default()
    }

    /// Returns the number of batches the server processed.
    pub fn server_batches(&self) -> u64 {
        self.server.stats().batches
    }
}

/// Loads the session configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => read_json(path),
        None => Ok(SyncConfig::default()),
    }
}

/// Reads an edit script: a JSON array of steps.
pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>, Box<dyn std::error::Error>> {
    read_json(path)
}

/// Runs the simulate command.
pub fn run(script: &Path, config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let steps = load_script(script)?;
    let mut simulation = Simulation::new(config);
    simulation.run(&steps)?;

    println!("Simulation");
    println!("==========");
    println!("Steps:     {}", steps.len());
    println!("Elapsed:   {}ms", simulation.elapsed().as_millis());
    println!();
    for (i, cycle) in simulation.cycles().iter().enumerate() {
        print!(
            "  cycle {:>3} at {:>6}ms: {} created, {} updated, {} deleted",
            i + 1,
            cycle.at_ms,
            cycle.created,
            cycle.updated,
            cycle.deleted
        );
        if cycle.retrying > 0 || cycle.dropped > 0 {
            print!(", {} retrying, {} dropped", cycle.retrying, cycle.dropped);
        }
        if let Some(err) = &cycle.transport_error {
            print!(" ({})", err);
        }
        println!();
    }

    let stats = simulation.stats();
    println!();
    println!("Batches:             {}", simulation.server_batches());
    println!("Operations sent:     {}", stats.operations_sent);
    println!("Acknowledged:        {}", stats.operations_acknowledged);
    println!("Retries:             {}", stats.retries);
    println!("Dropped:             {}", stats.operations_dropped);
    println!("Unsent:              {}", simulation.unsent());

    println!();
    println!("Final page:");
    for (slot, content) in simulation.local_contents() {
        println!("  [{}] {:?}", slot, content);
    }
    println!("Server holds {} live blocks", simulation.server_blocks().len());
    Ok(())
}
