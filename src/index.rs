//! The index: the encrypted registry of files, blocks, and allocations.
//!
//! The persisted form is a JSON document `{Files, Blocks, StartBlock}`
//! encrypted like any other blob and stored under the configured index
//! name. Two derived views are rebuilt on every load and never persisted:
//! a filename lookup map and, per block, the sorted list of allocated byte
//! ranges. Gaps between those ranges are the allocator's free space.
//!
//! Blocks form a singly-linked chain starting at `StartBlock`. The chain
//! only ever grows at the tail; deleting a file frees its ranges but never
//! removes a block.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::{random_block_name, Block, BlockMeta};
use crate::config::Config;
use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::store::BlobStore;

/// A half-open byte range `[start_byte, end_byte)` within a named block,
/// claimed by exactly one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockLocation {
    pub block: String,
    pub start_byte: u64,
    pub end_byte: u64,
}

impl BlockLocation {
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }
}

/// A file's entry in the index. `blocks` is ordered: concatenating the
/// ranges in sequence reassembles the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    pub blocks: Vec<BlockLocation>,
}

/// The persisted shape of the index. Field names are the on-disk contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct IndexDocument {
    files: Vec<FileMetadata>,
    blocks: BTreeMap<String, BlockMeta>,
    start_block: String,
}

#[derive(Debug)]
pub struct Index {
    files: Vec<FileMetadata>,
    blocks: BTreeMap<String, BlockMeta>,
    start_block: String,
    file_map: HashMap<String, usize>,
    block_allocation: HashMap<String, Vec<BlockLocation>>,
    config: Config,
}

/// Outcome of the allocation walk, staged so that nothing touches the
/// in-memory index until all block writes have succeeded.
struct AllocationPlan {
    /// Ranges for the new file, in reassembly order.
    locations: Vec<BlockLocation>,
    /// Blocks to append to the chain, in chain order, `next` links already
    /// set between them.
    new_blocks: Vec<BlockMeta>,
    /// Existing tail whose `next` should point at the first new block.
    link_tail: Option<String>,
    /// The store was empty; the first new block becomes the chain start.
    new_start: bool,
}

/// Free-space scan of a single block.
///
/// With no occupied ranges the whole prefix `[0, min(need, block_size))` is
/// taken in one piece. Otherwise gaps are scanned in order (before, between
/// and after the occupied ranges, which must be sorted by start); a gap is
/// usable only if it is at least `chunk_size` long — smaller gaps stay
/// behind as unusable fragmentation. Returns the chosen ranges and the
/// total bytes they cover.
fn find_space(
    block: &str,
    block_size: u64,
    occupied: &[BlockLocation],
    need: u64,
    chunk_size: u64,
) -> (Vec<BlockLocation>, u64) {
    let mut found = Vec::new();
    let mut remaining = need;

    if occupied.is_empty() {
        let take = need.min(block_size);
        if take > 0 {
            found.push(BlockLocation {
                block: block.to_string(),
                start_byte: 0,
                end_byte: take,
            });
            remaining -= take;
        }
        return (found, need - remaining);
    }

    let mut prev_end = 0;
    for allocation in occupied {
        if remaining == 0 {
            break;
        }
        let gap = allocation.start_byte.saturating_sub(prev_end);
        if gap >= chunk_size {
            let take = gap.min(remaining);
            found.push(BlockLocation {
                block: block.to_string(),
                start_byte: prev_end,
                end_byte: prev_end + take,
            });
            remaining -= take;
        }
        prev_end = allocation.end_byte;
    }

    if remaining > 0 {
        let gap = block_size.saturating_sub(prev_end);
        if gap >= chunk_size {
            let take = gap.min(remaining);
            found.push(BlockLocation {
                block: block.to_string(),
                start_byte: prev_end,
                end_byte: prev_end + take,
            });
            remaining -= take;
        }
    }

    (found, need - remaining)
}

impl Index {
    /// An empty index bound to `config`.
    pub fn new(config: Config) -> Self {
        Self {
            files: Vec::new(),
            blocks: BTreeMap::new(),
            start_block: String::new(),
            file_map: HashMap::new(),
            block_allocation: HashMap::new(),
            config,
        }
    }

    /// Loads the index blob, or returns an empty index when the store has
    /// none yet. Decrypt and parse failures abort the load; nothing is
    /// partially loaded.
    pub fn load(store: &dyn BlobStore, cipher: &Cipher, config: &Config) -> Result<Self> {
        if !store.exists(&config.index_file)? {
            debug!(blob = %config.index_file, "no index blob, starting empty");
            return Ok(Self::new(config.clone()));
        }
        let raw = store.read(&config.index_file)?;
        let plain = cipher.decrypt(&raw)?;
        let document: IndexDocument = serde_json::from_slice(&plain)?;

        let mut file_map = HashMap::new();
        let mut block_allocation: HashMap<String, Vec<BlockLocation>> = HashMap::new();
        for (position, file) in document.files.iter().enumerate() {
            // Legacy indices may contain duplicate filenames; the latest
            // entry wins, matching how they behaved when written.
            file_map.insert(file.filename.clone(), position);
            for location in &file.blocks {
                block_allocation
                    .entry(location.block.clone())
                    .or_default()
                    .push(location.clone());
            }
        }
        for allocations in block_allocation.values_mut() {
            allocations.sort_by_key(|location| location.start_byte);
        }

        debug!(
            files = document.files.len(),
            blocks = document.blocks.len(),
            "index loaded"
        );
        Ok(Self {
            files: document.files,
            blocks: document.blocks,
            start_block: document.start_block,
            file_map,
            block_allocation,
            config: config.clone(),
        })
    }

    /// Serialises, encrypts and writes the index blob, replacing any prior
    /// content. Only `Files`, `Blocks` and `StartBlock` are persisted; the
    /// derived views are rebuilt on load.
    pub fn save(&self, store: &dyn BlobStore, cipher: &Cipher) -> Result<()> {
        let document = IndexDocument {
            files: self.files.clone(),
            blocks: self.blocks.clone(),
            start_block: self.start_block.clone(),
        };
        let plain = serde_json::to_vec(&document)?;
        let sealed = cipher.encrypt(&plain)?;
        store.write(&self.config.index_file, &sealed)?;
        debug!(
            blob = %self.config.index_file,
            files = self.files.len(),
            blocks = self.blocks.len(),
            "index saved"
        );
        Ok(())
    }

    /// A copy of the file list; callers may reorder it freely.
    pub fn list_files(&self) -> Vec<FileMetadata> {
        self.files.clone()
    }

    /// The block registry, keyed by block name.
    pub fn blocks(&self) -> &BTreeMap<String, BlockMeta> {
        &self.blocks
    }

    /// Name of the first block in the chain; empty while no block exists.
    pub fn start_block(&self) -> &str {
        &self.start_block
    }

    /// The allocated ranges on one block, sorted by start.
    pub fn allocations(&self, block: &str) -> &[BlockLocation] {
        self.block_allocation
            .get(block)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Streams a file's bytes into `writer`, range by range in the order
    /// recorded in its metadata. Any block failure aborts mid-stream.
    pub fn get_file(
        &self,
        filename: &str,
        mut writer: impl Write,
        store: &dyn BlobStore,
        cipher: &Cipher,
    ) -> Result<()> {
        let file = self
            .file_map
            .get(filename)
            .and_then(|&position| self.files.get(position))
            .ok_or_else(|| Error::FileNotFound(filename.to_string()))?;

        for location in &file.blocks {
            let block_size = self.block_size_of(&location.block)?;
            let block = Block::load(&location.block, block_size, cipher, store)?;
            writer.write_all(block.range(location.start_byte, location.end_byte)?)?;
        }
        Ok(())
    }

    /// Adds a file, streaming `size` bytes out of `reader` into free space
    /// across the chain, creating tail blocks as needed.
    ///
    /// Runs in three phases: plan free ranges against a read-only view of
    /// the index, write every affected block, then commit the metadata. A
    /// failure in the first two phases leaves the in-memory index exactly
    /// as it was; blocks already rewritten hold unreferenced ciphertext
    /// until the next successful save.
    pub fn add_file(
        &mut self,
        filename: &str,
        size: u64,
        mut reader: impl Read,
        store: &dyn BlobStore,
        cipher: &Cipher,
    ) -> Result<()> {
        if self.file_map.contains_key(filename) {
            return Err(Error::FileAlreadyExists(filename.to_string()));
        }

        let plan = self.plan_allocation(size)?;
        debug!(
            file = %filename,
            size,
            ranges = plan.locations.len(),
            new_blocks = plan.new_blocks.len(),
            "allocation planned"
        );

        let new_names: HashSet<&str> = plan
            .new_blocks
            .iter()
            .map(|meta| meta.filename.as_str())
            .collect();
        for location in &plan.locations {
            let block_size = match self.blocks.get(&location.block) {
                Some(meta) => meta.size,
                None => {
                    plan.new_blocks
                        .iter()
                        .find(|meta| meta.filename == location.block)
                        .ok_or_else(|| {
                            Error::Corrupt(format!(
                                "planned range refers to unknown block `{}`",
                                location.block
                            ))
                        })?
                        .size
                }
            };
            let mut block = if new_names.contains(location.block.as_str()) {
                Block::zeroed(&location.block, block_size)
            } else {
                Block::load(&location.block, block_size, cipher, store)?
            };

            let mut chunk = vec![0u8; location.len() as usize];
            reader.read_exact(&mut chunk)?;
            block.overwrite(location.start_byte, &chunk)?;
            block.store(cipher, store)?;
        }

        self.commit_allocation(filename, size, plan);
        info!(file = %filename, size, "file added");
        Ok(())
    }

    /// Removes a file from the index. With `zero_out` the freed ranges are
    /// first overwritten with zero bytes in the store, one loaded block at
    /// a time in the order the file's metadata lists them. All zeroing I/O
    /// happens before any in-memory change, so a failure mid-way leaves
    /// the index untouched (some blocks may already be zeroed).
    ///
    /// Block metadata is never removed: a fully freed block stays in the
    /// chain for reuse.
    pub fn delete_file(
        &mut self,
        filename: &str,
        store: &dyn BlobStore,
        cipher: &Cipher,
        zero_out: bool,
    ) -> Result<()> {
        let position = *self
            .file_map
            .get(filename)
            .ok_or_else(|| Error::FileNotFound(filename.to_string()))?;
        let file = self
            .files
            .get(position)
            .ok_or_else(|| Error::Corrupt("file lookup map is out of sync".to_string()))?;

        if zero_out && !file.blocks.is_empty() {
            let mut current: Option<Block> = None;
            for location in &file.blocks {
                let loaded = match &current {
                    Some(block) => block.name() == location.block,
                    None => false,
                };
                if !loaded {
                    if let Some(block) = current.take() {
                        block.store(cipher, store)?;
                    }
                    let block_size = self.block_size_of(&location.block)?;
                    current = Some(Block::load(&location.block, block_size, cipher, store)?);
                }
                if let Some(block) = current.as_mut() {
                    let zeros = vec![0u8; location.len() as usize];
                    block.overwrite(location.start_byte, &zeros)?;
                }
            }
            if let Some(block) = current {
                block.store(cipher, store)?;
            }
        }

        let file = self.files.remove(position);
        self.file_map.remove(filename);
        for other in self.file_map.values_mut() {
            if *other > position {
                *other -= 1;
            }
        }
        for location in &file.blocks {
            if let Some(allocations) = self.block_allocation.get_mut(&location.block) {
                if let Some(found) = allocations.iter().position(|entry| entry == location) {
                    allocations.remove(found);
                }
            }
        }

        info!(file = %filename, zero_out, "file deleted");
        Ok(())
    }

    fn block_size_of(&self, block: &str) -> Result<u64> {
        self.blocks
            .get(block)
            .map(|meta| meta.size)
            .ok_or_else(|| Error::Corrupt(format!("index refers to unknown block `{block}`")))
    }

    /// Walks the chain collecting free ranges for `need` bytes, appending
    /// planned tail blocks when the existing chain runs out of usable
    /// space. Read-only: the plan is applied by [`Self::commit_allocation`].
    fn plan_allocation(&self, mut need: u64) -> Result<AllocationPlan> {
        let mut plan = AllocationPlan {
            locations: Vec::new(),
            new_blocks: Vec::new(),
            link_tail: None,
            new_start: false,
        };
        if need == 0 {
            return Ok(plan);
        }

        let block_size = self.config.block_size;
        let (mut current, mut planned) = if self.start_block.is_empty() {
            let name = self.fresh_block_name(&plan);
            plan.new_blocks
                .push(BlockMeta::fresh(name.clone(), block_size));
            plan.new_start = true;
            (name, true)
        } else {
            (self.start_block.clone(), false)
        };

        loop {
            let (current_size, occupied): (u64, &[BlockLocation]) = if planned {
                (block_size, &[])
            } else {
                (self.block_size_of(&current)?, self.allocations(&current))
            };
            let (ranges, covered) = find_space(
                &current,
                current_size,
                occupied,
                need,
                self.config.chunk_size,
            );
            need -= covered;
            plan.locations.extend(ranges);
            if need == 0 {
                break;
            }

            if planned {
                let name = self.fresh_block_name(&plan);
                if let Some(previous) = plan.new_blocks.last_mut() {
                    previous.next = name.clone();
                }
                plan.new_blocks
                    .push(BlockMeta::fresh(name.clone(), block_size));
                current = name;
            } else {
                let next = self
                    .blocks
                    .get(&current)
                    .map(|meta| meta.next.clone())
                    .unwrap_or_default();
                if next.is_empty() {
                    let name = self.fresh_block_name(&plan);
                    plan.link_tail = Some(current.clone());
                    plan.new_blocks
                        .push(BlockMeta::fresh(name.clone(), block_size));
                    current = name;
                    planned = true;
                } else {
                    current = next;
                }
            }
        }
        Ok(plan)
    }

    fn commit_allocation(&mut self, filename: &str, size: u64, plan: AllocationPlan) {
        let first_new = plan.new_blocks.first().map(|meta| meta.filename.clone());
        if let (Some(tail), Some(first)) = (&plan.link_tail, &first_new) {
            if let Some(meta) = self.blocks.get_mut(tail) {
                meta.next = first.clone();
            }
        }
        for meta in plan.new_blocks {
            debug!(block = %meta.filename, size = meta.size, "block appended to chain");
            self.blocks.insert(meta.filename.clone(), meta);
        }
        if plan.new_start {
            if let Some(first) = first_new {
                self.start_block = first;
            }
        }

        let mut touched: HashSet<String> = HashSet::new();
        for location in &plan.locations {
            self.block_allocation
                .entry(location.block.clone())
                .or_default()
                .push(location.clone());
            touched.insert(location.block.clone());
        }
        for block in touched {
            if let Some(allocations) = self.block_allocation.get_mut(&block) {
                allocations.sort_by_key(|location| location.start_byte);
            }
        }

        self.files.push(FileMetadata {
            filename: filename.to_string(),
            size,
            blocks: plan.locations,
        });
        self.file_map
            .insert(filename.to_string(), self.files.len() - 1);
    }

    /// Draws random names until one collides with neither the registry nor
    /// the blocks already planned in this walk.
    fn fresh_block_name(&self, plan: &AllocationPlan) -> String {
        loop {
            let name = random_block_name();
            let taken = self.blocks.contains_key(&name)
                || plan.new_blocks.iter().any(|meta| meta.filename == name);
            if !taken {
                return name;
            }
        }
    }
}
