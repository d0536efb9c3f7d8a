//! Block master
//!
//! Lock order: block map, then a worker entry. The worker registry lock is
//! only held long enough to look up or insert an entry. None of these locks
//! are ever taken while waiting on the namespace.

use super::block_info::MasterBlockInfo;
use super::worker::MasterWorkerInfo;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_common::{
    BlockId, BlockInfo, BlockLocation, Error, MasterConfig, Result, TierBytes, WorkerId,
    WorkerInfo, WorkerNetAddress, WorkerState, current_time_ms, tier_ordinal,
};
use tessera_journal::{Journal, JournalEntry};
use tracing::{debug, info, warn};

/// Block ids held by a worker, keyed by tier alias
pub type TierBlocks = HashMap<String, Vec<BlockId>>;

/// Reply to a worker heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatCommand {
    /// Nothing to do
    Nothing,
    /// The worker has an id but never registered; it should register
    Register,
    /// Drop these blocks
    Free(Vec<BlockId>),
}

#[derive(Default)]
struct WorkerRegistry {
    by_id: HashMap<WorkerId, Arc<Mutex<MasterWorkerInfo>>>,
    by_address: HashMap<WorkerNetAddress, WorkerId>,
}

/// Journaled state, shared by replay and runtime application
#[derive(Default)]
struct BlockState {
    blocks: HashMap<BlockId, MasterBlockInfo>,
    next_container_id: u64,
}

fn apply_entry(state: &mut BlockState, entry: JournalEntry) -> Result<()> {
    match entry {
        JournalEntry::BlockContainerIdGenerator { next_container_id } => {
            state.next_container_id = state.next_container_id.max(next_container_id);
        }
        JournalEntry::BlockInfo { block_id, length } => {
            state
                .blocks
                .entry(block_id)
                .and_modify(|info| info.set_length(length))
                .or_insert_with(|| MasterBlockInfo::new(block_id, length));
        }
        JournalEntry::DeleteBlocks { block_ids } => {
            for block_id in block_ids {
                state.blocks.remove(&block_id);
            }
        }
        other => {
            return Err(Error::JournalCorrupted(format!(
                "unexpected {} entry in block journal",
                other.kind()
            )));
        }
    }
    Ok(())
}

/// Block authority and worker registry
pub struct BlockMaster {
    journal: Journal,
    blocks: RwLock<HashMap<BlockId, MasterBlockInfo>>,
    workers: RwLock<WorkerRegistry>,
    next_container_id: Mutex<u64>,
    /// Journaled mutations hold it shared; a checkpoint holds it exclusively
    checkpoint_gate: RwLock<()>,
    worker_timeout_ms: u64,
}

impl BlockMaster {
    /// Open the block journal under the configured journal directory and
    /// rebuild block metadata from it
    pub fn open(config: &MasterConfig) -> Result<Self> {
        let journal = Journal::open(config.journal.master_dir("block"), &config.journal)?;

        let mut state = BlockState::default();
        journal.replay(|entry| apply_entry(&mut state, entry))?;

        info!(
            "Block master ready: {} blocks, next container id {}",
            state.blocks.len(),
            state.next_container_id
        );

        Ok(Self {
            journal,
            blocks: RwLock::new(state.blocks),
            workers: RwLock::new(WorkerRegistry::default()),
            next_container_id: Mutex::new(state.next_container_id),
            checkpoint_gate: RwLock::new(()),
            worker_timeout_ms: config.worker_timeout_ms,
        })
    }

    /// Allocate a block container id; the file owning it derives its id and
    /// block ids from it
    pub fn new_container_id(&self) -> Result<u64> {
        let _gate = self.checkpoint_gate.read();
        let mut next = self.next_container_id.lock();
        let container_id = *next;
        self.journal.append(&JournalEntry::BlockContainerIdGenerator {
            next_container_id: container_id + 1,
        })?;
        *next = container_id + 1;
        Ok(container_id)
    }

    /// Id for the worker at `address`. An address keeps its id for as long
    /// as the registry holds it; otherwise a fresh random id is issued.
    pub fn get_worker_id(&self, address: &WorkerNetAddress) -> WorkerId {
        let mut registry = self.workers.write();
        if let Some(id) = registry.by_address.get(address) {
            debug!("Worker {} already has id {}", address, id);
            return *id;
        }

        let id = loop {
            let candidate = WorkerId::new(rand::random::<u64>() & (i64::MAX as u64));
            if candidate.as_u64() != 0 && !registry.by_id.contains_key(&candidate) {
                break candidate;
            }
        };

        registry.by_id.insert(
            id,
            Arc::new(Mutex::new(MasterWorkerInfo::new(id, address.clone()))),
        );
        registry.by_address.insert(address.clone(), id);
        info!("Assigned worker id {} to {}", id, address);
        id
    }

    fn worker(&self, worker_id: WorkerId) -> Result<Arc<Mutex<MasterWorkerInfo>>> {
        self.workers
            .read()
            .by_id
            .get(&worker_id)
            .cloned()
            .ok_or(Error::UnknownWorker(worker_id))
    }

    /// Register a worker with its capacity, usage, and the full set of
    /// blocks it holds. Blocks the master does not know are queued for
    /// removal on the worker.
    pub fn register_worker(
        &self,
        worker_id: WorkerId,
        tier_aliases: &[String],
        total_bytes_on_tiers: TierBytes,
        used_bytes_on_tiers: TierBytes,
        current_blocks_on_tiers: &TierBlocks,
    ) -> Result<()> {
        if let Some(tier) = total_bytes_on_tiers
            .keys()
            .find(|tier| !tier_aliases.contains(tier))
        {
            return Err(Error::invalid_argument(format!(
                "capacity reported for undeclared tier {tier}"
            )));
        }

        let worker = self.worker(worker_id)?;
        let mut blocks = self.blocks.write();
        let mut worker = worker.lock();

        let mut known = HashSet::new();
        let mut orphaned = Vec::new();
        for (tier, ids) in current_blocks_on_tiers {
            for id in ids {
                match blocks.get_mut(id) {
                    Some(info) => {
                        info.add_location(worker_id, tier);
                        known.insert(*id);
                    }
                    None => orphaned.push(*id),
                }
            }
        }

        let dropped = worker.register(
            tier_aliases.to_vec(),
            total_bytes_on_tiers,
            used_bytes_on_tiers,
            known,
        );
        for id in &dropped {
            if let Some(info) = blocks.get_mut(id) {
                info.remove_location(worker_id);
            }
        }
        for id in &orphaned {
            worker.schedule_removal(*id);
        }

        info!(
            "Registered worker {} at {}: {} blocks, {} unknown to the master",
            worker_id,
            worker.address(),
            worker.blocks().len(),
            orphaned.len()
        );
        Ok(())
    }

    /// `get_worker_id` followed by `register_worker`
    pub fn register_worker_with_address(
        &self,
        address: &WorkerNetAddress,
        tier_aliases: &[String],
        total_bytes_on_tiers: TierBytes,
        used_bytes_on_tiers: TierBytes,
        current_blocks_on_tiers: &TierBlocks,
    ) -> Result<WorkerId> {
        let worker_id = self.get_worker_id(address);
        self.register_worker(
            worker_id,
            tier_aliases,
            total_bytes_on_tiers,
            used_bytes_on_tiers,
            current_blocks_on_tiers,
        )?;
        Ok(worker_id)
    }

    /// Periodic report from a worker. An unknown id is `UnknownWorker`; the
    /// worker should ask for an id and register again.
    pub fn heartbeat(
        &self,
        worker_id: WorkerId,
        used_bytes_on_tiers: TierBytes,
        removed_block_ids: &[BlockId],
        added_blocks_on_tiers: &TierBlocks,
    ) -> Result<HeartbeatCommand> {
        let worker = self.worker(worker_id)?;
        let mut blocks = self.blocks.write();
        let mut worker = worker.lock();

        for id in removed_block_ids {
            if let Some(info) = blocks.get_mut(id) {
                info.remove_location(worker_id);
            }
            worker.remove_block(*id);
        }

        for (tier, ids) in added_blocks_on_tiers {
            for id in ids {
                match blocks.get_mut(id) {
                    Some(info) => {
                        info.add_location(worker_id, tier);
                        worker.add_block(*id);
                    }
                    None => {
                        warn!("Worker {} reported unknown block {}", worker_id, id);
                        worker.schedule_removal(*id);
                    }
                }
            }
        }

        worker.set_used_bytes_on_tiers(used_bytes_on_tiers);
        worker.touch();

        if !worker.is_registered() {
            return Ok(HeartbeatCommand::Register);
        }
        let to_remove = worker.take_to_remove();
        if to_remove.is_empty() {
            Ok(HeartbeatCommand::Nothing)
        } else {
            debug!("Asking worker {} to free {} blocks", worker_id, to_remove.len());
            Ok(HeartbeatCommand::Free(to_remove))
        }
    }

    /// A worker finished writing a block. The first commit of a block makes
    /// it known; later commits add locations.
    pub fn commit_block(
        &self,
        worker_id: WorkerId,
        used_bytes_on_tier: u64,
        tier_alias: &str,
        block_id: BlockId,
        length: u64,
    ) -> Result<()> {
        let worker = self.worker(worker_id)?;
        self.ensure_block(block_id, length)?;

        let mut blocks = self.blocks.write();
        let mut worker = worker.lock();
        let Some(info) = blocks.get_mut(&block_id) else {
            // Removed by a concurrent delete
            return Err(Error::BlockNotFound(block_id));
        };
        info.add_location(worker_id, tier_alias);
        worker.add_block(block_id);
        worker.set_used_bytes_on_tier(tier_alias, used_bytes_on_tier);
        worker.touch();

        debug!(
            "Worker {} committed block {} ({} bytes) on {}",
            worker_id, block_id, length, tier_alias
        );
        Ok(())
    }

    /// Record a block that exists only in under storage
    pub fn commit_block_in_ufs(&self, block_id: BlockId, length: u64) -> Result<()> {
        self.ensure_block(block_id, length)
    }

    /// Journal and insert `block_id` if it is not yet known
    fn ensure_block(&self, block_id: BlockId, length: u64) -> Result<()> {
        if let Some(info) = self.blocks.read().get(&block_id) {
            if info.length() != length {
                warn!(
                    "Block {} committed with length {}, already known with length {}",
                    block_id,
                    length,
                    info.length()
                );
            }
            return Ok(());
        }

        let _gate = self.checkpoint_gate.read();
        self.journal
            .append(&JournalEntry::BlockInfo { block_id, length })?;
        self.blocks
            .write()
            .entry(block_id)
            .or_insert_with(|| MasterBlockInfo::new(block_id, length));
        Ok(())
    }

    /// Current view of a block. A freed block has no locations; a block
    /// never committed is `BlockNotFound`.
    pub fn get_block_info(&self, block_id: BlockId) -> Result<BlockInfo> {
        let blocks = self.blocks.read();
        let info = blocks.get(&block_id).ok_or(Error::BlockNotFound(block_id))?;
        Ok(self.generate_block_info(info))
    }

    /// Views of the given blocks, in order, skipping unknown ones
    pub fn get_block_info_list(&self, block_ids: &[BlockId]) -> Vec<BlockInfo> {
        let blocks = self.blocks.read();
        block_ids
            .iter()
            .filter_map(|id| blocks.get(id))
            .map(|info| self.generate_block_info(info))
            .collect()
    }

    fn generate_block_info(&self, info: &MasterBlockInfo) -> BlockInfo {
        let registry = self.workers.read();
        let mut locations: Vec<BlockLocation> = info
            .locations()
            .filter_map(|(worker_id, tier)| {
                registry.by_id.get(&worker_id).map(|worker| BlockLocation {
                    worker_id,
                    worker_address: worker.lock().address().clone(),
                    tier_alias: tier.to_string(),
                })
            })
            .collect();
        locations.sort_by(|a, b| {
            tier_ordinal(&a.tier_alias)
                .cmp(&tier_ordinal(&b.tier_alias))
                .then(a.worker_id.cmp(&b.worker_id))
        });

        BlockInfo {
            block_id: info.block_id(),
            length: info.length(),
            locations,
        }
    }

    /// Drop worker copies of the given blocks. The block records stay; each
    /// holder is told to remove its copy at its next heartbeat.
    pub fn free_blocks(&self, block_ids: &[BlockId]) {
        let mut blocks = self.blocks.write();
        for id in block_ids {
            let Some(info) = blocks.get_mut(id) else {
                continue;
            };
            for worker_id in info.clear_locations() {
                self.schedule_removal(worker_id, *id);
            }
        }
    }

    /// Forget the given blocks entirely, asking holders to drop them
    pub fn remove_blocks(&self, block_ids: &[BlockId]) -> Result<()> {
        let known: Vec<BlockId> = {
            let blocks = self.blocks.read();
            block_ids
                .iter()
                .copied()
                .filter(|id| blocks.contains_key(id))
                .collect()
        };
        if known.is_empty() {
            return Ok(());
        }

        let _gate = self.checkpoint_gate.read();
        self.journal.append(&JournalEntry::DeleteBlocks {
            block_ids: known.clone(),
        })?;

        let mut blocks = self.blocks.write();
        for id in &known {
            if let Some(mut info) = blocks.remove(id) {
                for worker_id in info.clear_locations() {
                    self.schedule_removal(worker_id, *id);
                }
            }
        }
        debug!("Removed {} blocks", known.len());
        Ok(())
    }

    fn schedule_removal(&self, worker_id: WorkerId, block_id: BlockId) {
        if let Some(worker) = self.workers.read().by_id.get(&worker_id) {
            let mut worker = worker.lock();
            worker.remove_block(block_id);
            worker.schedule_removal(block_id);
        }
    }

    /// All registered workers
    pub fn worker_info_list(&self) -> Vec<WorkerInfo> {
        let now = current_time_ms();
        let registry = self.workers.read();
        let mut workers: Vec<WorkerInfo> = registry
            .by_id
            .values()
            .map(|worker| worker.lock())
            .filter(|worker| worker.is_registered())
            .map(|worker| worker.to_worker_info(now, self.worker_timeout_ms))
            .collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    /// Workers that have not been heard from within the worker timeout
    pub fn lost_workers(&self) -> Vec<WorkerInfo> {
        self.worker_info_list()
            .into_iter()
            .filter(|w| w.state == WorkerState::Lost)
            .collect()
    }

    /// Total capacity across registered workers
    pub fn capacity_bytes(&self) -> u64 {
        self.worker_info_list().iter().map(|w| w.capacity_bytes).sum()
    }

    /// Total used bytes across registered workers
    pub fn used_bytes(&self) -> u64 {
        self.worker_info_list().iter().map(|w| w.used_bytes).sum()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Write a checkpoint of block metadata and truncate the journal
    pub fn checkpoint(&self) -> Result<()> {
        let _gate = self.checkpoint_gate.write();
        let lsn = self.journal.current_lsn();

        let mut entries = vec![JournalEntry::BlockContainerIdGenerator {
            next_container_id: *self.next_container_id.lock(),
        }];
        let blocks = self.blocks.read();
        let mut infos: Vec<&MasterBlockInfo> = blocks.values().collect();
        infos.sort_by_key(|info| info.block_id());
        entries.extend(infos.into_iter().map(|info| JournalEntry::BlockInfo {
            block_id: info.block_id(),
            length: info.length(),
        }));
        drop(blocks);

        self.journal.checkpoint(lsn, &entries)?;
        Ok(())
    }

    /// Checkpoint if enough journal entries have accumulated
    pub fn maybe_checkpoint(&self) -> Result<bool> {
        if !self.journal.needs_checkpoint() {
            return Ok(false);
        }
        self.checkpoint()?;
        Ok(true)
    }
}
