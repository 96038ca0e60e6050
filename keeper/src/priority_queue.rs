//! Troves ordered by health, riskiest first

use crate::health::TroveHealth;
use alloy_primitives::Address;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use trovekit::trove_math::Decimal;

#[derive(Debug, Default)]
pub struct HealthQueue {
    queue: PriorityQueue<Address, Reverse<Decimal>>,
    entries: HashMap<Address, TroveHealth>,
}

impl HealthQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a Trove's health
    pub fn push(&mut self, health: TroveHealth) {
        self.queue.push(health.owner, Reverse(health.health));
        self.entries.insert(health.owner, health);
    }

    pub fn remove(&mut self, owner: &Address) -> Option<TroveHealth> {
        self.queue.remove(owner);
        self.entries.remove(owner)
    }

    /// The least healthy Trove
    pub fn peek(&self) -> Option<&TroveHealth> {
        self.queue
            .peek()
            .and_then(|(owner, _)| self.entries.get(owner))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Up to `limit` Troves below health one, worst first
    pub fn get_liquidatable(&self, limit: usize) -> Vec<TroveHealth> {
        self.queue
            .clone()
            .into_sorted_iter()
            .take_while(|(_, Reverse(health))| *health < Decimal::ONE)
            .take(limit)
            .filter_map(|(owner, _)| self.entries.get(&owner).cloned())
            .collect()
    }

    /// Drop entries for owners not in `seen`, e.g. Troves that left the scanned tail
    pub fn retain_owners(&mut self, seen: &[Address]) {
        let stale: Vec<Address> = self
            .entries
            .keys()
            .filter(|owner| !seen.contains(owner))
            .copied()
            .collect();
        for owner in stale {
            self.remove(&owner);
        }
    }
}
