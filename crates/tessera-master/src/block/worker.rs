use std::collections::HashSet;
use tessera_common::{
    BlockId, TierBytes, WorkerId, WorkerInfo, WorkerNetAddress, WorkerState, current_time_ms,
};

/// Registry entry of one worker
#[derive(Debug, Clone)]
pub struct MasterWorkerInfo {
    id: WorkerId,
    address: WorkerNetAddress,
    start_time_ms: u64,
    last_updated_ms: u64,
    registered: bool,
    tier_aliases: Vec<String>,
    total_bytes_on_tiers: TierBytes,
    used_bytes_on_tiers: TierBytes,
    blocks: HashSet<BlockId>,
    /// Blocks the worker should drop, sent with the next heartbeat reply
    to_remove: HashSet<BlockId>,
}

impl MasterWorkerInfo {
    pub fn new(id: WorkerId, address: WorkerNetAddress) -> Self {
        let now = current_time_ms();
        Self {
            id,
            address,
            start_time_ms: now,
            last_updated_ms: now,
            registered: false,
            tier_aliases: Vec::new(),
            total_bytes_on_tiers: TierBytes::new(),
            used_bytes_on_tiers: TierBytes::new(),
            blocks: HashSet::new(),
            to_remove: HashSet::new(),
        }
    }

    /// Replace capacity, usage and the full block set with what the worker
    /// reported. Returns the blocks the worker held before but no longer
    /// reports.
    pub fn register(
        &mut self,
        tier_aliases: Vec<String>,
        total_bytes_on_tiers: TierBytes,
        used_bytes_on_tiers: TierBytes,
        blocks: HashSet<BlockId>,
    ) -> Vec<BlockId> {
        let dropped: Vec<BlockId> = self.blocks.difference(&blocks).copied().collect();
        self.tier_aliases = tier_aliases;
        self.total_bytes_on_tiers = total_bytes_on_tiers;
        self.used_bytes_on_tiers = used_bytes_on_tiers;
        self.blocks = blocks;
        self.to_remove.retain(|id| self.blocks.contains(id));
        self.registered = true;
        self.touch();
        dropped
    }

    pub const fn id(&self) -> WorkerId {
        self.id
    }

    pub const fn address(&self) -> &WorkerNetAddress {
        &self.address
    }

    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    pub const fn last_updated_ms(&self) -> u64 {
        self.last_updated_ms
    }

    pub fn touch(&mut self) {
        self.last_updated_ms = current_time_ms();
    }

    pub fn add_block(&mut self, block_id: BlockId) {
        self.blocks.insert(block_id);
    }

    pub fn remove_block(&mut self, block_id: BlockId) {
        self.blocks.remove(&block_id);
        self.to_remove.remove(&block_id);
    }

    pub fn blocks(&self) -> &HashSet<BlockId> {
        &self.blocks
    }

    /// Ask the worker to drop `block_id` at its next heartbeat
    pub fn schedule_removal(&mut self, block_id: BlockId) {
        self.to_remove.insert(block_id);
    }

    /// Take the pending removals, in id order
    pub fn take_to_remove(&mut self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.to_remove.drain().collect();
        ids.sort_unstable();
        ids
    }

    pub fn set_used_bytes_on_tiers(&mut self, used: TierBytes) {
        self.used_bytes_on_tiers.extend(used);
    }

    pub fn set_used_bytes_on_tier(&mut self, tier_alias: &str, used: u64) {
        self.used_bytes_on_tiers.insert(tier_alias.to_string(), used);
    }

    pub fn tier_aliases(&self) -> &[String] {
        &self.tier_aliases
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.total_bytes_on_tiers.values().sum()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes_on_tiers.values().sum()
    }

    /// Snapshot for callers; the worker is `Lost` once it has been silent
    /// for `timeout_ms`
    pub fn to_worker_info(&self, now_ms: u64, timeout_ms: u64) -> WorkerInfo {
        let state = if now_ms.saturating_sub(self.last_updated_ms) > timeout_ms {
            WorkerState::Lost
        } else {
            WorkerState::Live
        };
        WorkerInfo {
            id: self.id,
            address: self.address.clone(),
            state,
            capacity_bytes: self.capacity_bytes(),
            used_bytes: self.used_bytes(),
            start_time_ms: self.start_time_ms,
            last_contact_ms: self.last_updated_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tiers(pairs: &[(&str, u64)]) -> TierBytes {
        pairs.iter().map(|(t, b)| ((*t).to_string(), *b)).collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_register_reports_dropped_blocks() {
        let mut worker = MasterWorkerInfo::new(WorkerId::new(1), WorkerNetAddress::default());
        assert!(!worker.is_registered());

        let first: HashSet<BlockId> = [1, 2, 3].into_iter().map(BlockId::new).collect();
        worker.register(vec!["MEM".into()], tiers(&[("MEM", 100)]), tiers(&[("MEM", 10)]), first);
        assert!(worker.is_registered());
        assert_eq!(worker.capacity_bytes(), 100);

        let second: HashSet<BlockId> = [2, 3, 4].into_iter().map(BlockId::new).collect();
        let dropped = worker.register(
            vec!["MEM".into()],
            tiers(&[("MEM", 100)]),
            tiers(&[("MEM", 20)]),
            second,
        );
        assert_eq!(dropped, vec![BlockId::new(1)]);
        assert_eq!(worker.used_bytes(), 20);
    }

    #[test]
    fn test_pending_removals_drain_once() {
        let mut worker = MasterWorkerInfo::new(WorkerId::new(1), WorkerNetAddress::default());
        worker.schedule_removal(BlockId::new(9));
        worker.schedule_removal(BlockId::new(3));
        assert_eq!(worker.take_to_remove(), vec![BlockId::new(3), BlockId::new(9)]);
        assert!(worker.take_to_remove().is_empty());
    }

    #[test]
    fn test_lost_after_timeout() {
        let worker = MasterWorkerInfo::new(WorkerId::new(1), WorkerNetAddress::default());
        let last = worker.last_updated_ms();
        assert_eq!(worker.to_worker_info(last + 10, 100).state, WorkerState::Live);
        assert_eq!(worker.to_worker_info(last + 101, 100).state, WorkerState::Lost);
    }
}
