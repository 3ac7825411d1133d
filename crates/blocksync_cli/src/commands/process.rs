//! Process command implementation.

use super::read_json;
use blocksync_protocol::{
    Block, BatchSyncRequest, BatchSyncResponse, ErrorCode, PageId, WireFormat,
};
use blocksync_server::{BlockStore, MemoryBlockStore, ServerConfig, SyncServer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Pages and blocks a server starts with.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerFixture {
    /// Pages that accept new blocks.
    pub pages: Vec<PageId>,
    /// Live blocks. Their pages are registered implicitly.
    pub blocks: Vec<Block>,
}

/// Outcome of processing one batch.
#[derive(Debug, Serialize)]
pub struct ProcessReport {
    /// Response the server sent.
    pub response: BatchSyncResponse,
    /// Live blocks per page after processing, ordered by position.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pages: BTreeMap<String, Vec<Block>>,
}

/// Loads the server configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => read_json(path),
        None => Ok(ServerConfig::default()),
    }
}

/// Reads a batch request, decoding CBOR when the file extension is `.cbor`.
pub fn read_batch(path: &Path) -> Result<BatchSyncRequest, Box<dyn std::error::Error>> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("cbor") => WireFormat::Cbor,
        _ => WireFormat::Json,
    };
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    Ok(BatchSyncRequest::decode(&bytes, format)?)
}

/// Processes `request` against a server seeded from `fixture`.
pub fn process(
    fixture: &ServerFixture,
    request: &BatchSyncRequest,
    config: ServerConfig,
    include_pages: bool,
) -> Result<ProcessReport, Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryBlockStore::with_default_types());
    let mut pages: BTreeSet<PageId> = fixture.pages.iter().copied().collect();
    for page in &fixture.pages {
        store.add_page(*page);
    }
    for block in &fixture.blocks {
        store.add_page(block.page_id);
        pages.insert(block.page_id);
        store.seed(block.clone());
    }
    info!(
        pages = pages.len(),
        blocks = fixture.blocks.len(),
        "seeded server"
    );

    let server = SyncServer::with_store(config, store.clone());
    let response = server.handle_batch(request)?;

    let mut listed = BTreeMap::new();
    if include_pages {
        pages.extend(
            request
                .creates
                .iter()
                .filter_map(|c| PageId::parse(&c.page_id).ok()),
        );
        for page in pages {
            listed.insert(page.to_string(), store.list_by_page(page)?);
        }
    }

    Ok(ProcessReport {
        response,
        pages: listed,
    })
}

/// Runs the process command.
pub fn run(
    batch: &Path,
    blocks: Option<&Path>,
    config: ServerConfig,
    include_pages: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fixture = match blocks {
        Some(path) => read_json(path)?,
        None => ServerFixture::default(),
    };
    let request = read_batch(batch)?;
    let report = process(&fixture, &request, config, include_pages)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&request, &report);
    }
    Ok(())
}

fn print_text(request: &BatchSyncRequest, report: &ProcessReport) {
    let response = &report.response;
    println!("Batch Sync");
    println!("==========");
    println!(
        "Received:  {} creates, {} updates, {} deletes",
        request.creates.len(),
        request.updates.len(),
        request.deletes.len()
    );
    println!(
        "Applied:   {} creates, {} updates, {} deletes",
        response.creates.len(),
        response.updates.len(),
        response.deletes.len()
    );
    println!("Failed:    {}", response.errors.len());

    if !response.creates.is_empty() {
        println!();
        println!("Created:");
        for created in &response.creates {
            println!("  {} -> {}", created.temp_id, created.block.id);
        }
    }
    if !response.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &response.errors {
            println!(
                "  {} {} [{}]: {}",
                error.kind,
                error.operation_id,
                code_name(error.code),
                error.error
            );
        }
    }
    for (page, blocks) in &report.pages {
        println!();
        println!("Page {} ({} blocks):", page, blocks.len());
        for block in blocks {
            println!(
                "  {:>4}  {}  {:<10} {:?}",
                block.position, block.id, block.block_type, block.content
            );
        }
    }
}

fn code_name(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Validation => "validation",
        ErrorCode::NotFound => "not_found",
        ErrorCode::Internal => "internal",
    }
}
