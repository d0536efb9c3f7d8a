use std::collections::HashMap;
use tessera_common::{BlockId, WorkerId};

/// Master-side record of a block: its length and which workers hold a copy
/// on which tier. Locations are not journaled; workers report them again
/// when they register.
#[derive(Debug, Clone)]
pub struct MasterBlockInfo {
    block_id: BlockId,
    length: u64,
    locations: HashMap<WorkerId, String>,
}

impl MasterBlockInfo {
    pub fn new(block_id: BlockId, length: u64) -> Self {
        Self {
            block_id,
            length,
            locations: HashMap::new(),
        }
    }

    pub const fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub const fn length(&self) -> u64 {
        self.length
    }

    pub(crate) fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    /// Record that `worker_id` holds a copy on `tier_alias`
    pub fn add_location(&mut self, worker_id: WorkerId, tier_alias: &str) {
        self.locations.insert(worker_id, tier_alias.to_string());
    }

    pub fn remove_location(&mut self, worker_id: WorkerId) -> bool {
        self.locations.remove(&worker_id).is_some()
    }

    /// Drop every location, returning the workers that held a copy
    pub fn clear_locations(&mut self) -> Vec<WorkerId> {
        self.locations.drain().map(|(worker_id, _)| worker_id).collect()
    }

    pub fn locations(&self) -> impl Iterator<Item = (WorkerId, &str)> {
        self.locations.iter().map(|(id, tier)| (*id, tier.as_str()))
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }
}
