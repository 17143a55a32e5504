//! Hash partitioning of keys across a fixed set of queues.

use std::fmt::Display;
use std::hash::Hash;

use crate::{BackoffPolicy, WorkQueue};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// N independent work queues; each key is owned by exactly one of them.
pub struct PartitionedQueue<T> {
    queues: Vec<WorkQueue<T>>,
}

impl<T> PartitionedQueue<T>
where
    T: Clone + Eq + Hash + Display + Send + 'static,
{
    /// Creates `partitions` queues (at least one).
    pub fn new(partitions: usize, backoff: BackoffPolicy) -> Self {
        let queues = (0..partitions.max(1))
            .map(|_| WorkQueue::new(backoff))
            .collect();
        Self { queues }
    }

    pub fn partitions(&self) -> usize {
        self.queues.len()
    }

    /// Partition index owning `item`.
    pub fn partition_of(&self, item: &T) -> usize {
        fnv1a_32(item.to_string().as_bytes()) as usize % self.queues.len()
    }

    /// The queue owning `item`.
    pub fn queue_for(&self, item: &T) -> &WorkQueue<T> {
        &self.queues[self.partition_of(item)]
    }

    pub fn queue(&self, partition: usize) -> Option<&WorkQueue<T>> {
        self.queues.get(partition)
    }

    /// Adds `item` to its owning queue.
    pub fn add(&self, item: T) {
        self.queue_for(&item).add(item);
    }

    pub fn shut_down(&self) {
        for queue in &self.queues {
            queue.shut_down();
        }
    }

    /// Total waiting items across partitions.
    pub fn len(&self) -> usize {
        self.queues.iter().map(WorkQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_partition_is_stable() {
        let queues: PartitionedQueue<String> = PartitionedQueue::new(4, BackoffPolicy::default());
        let key = "default/resnet".to_string();
        let p = queues.partition_of(&key);
        for _ in 0..10 {
            assert_eq!(queues.partition_of(&key), p);
        }
        assert!(p < 4);
    }

    #[tokio::test]
    async fn test_add_routes_to_owner() {
        let queues: PartitionedQueue<String> = PartitionedQueue::new(3, BackoffPolicy::default());
        let key = "team-a/bert".to_string();
        queues.add(key.clone());
        queues.add(key.clone());

        assert_eq!(queues.len(), 1);
        let owner = queues.queue_for(&key);
        assert_eq!(owner.len(), 1);
        assert_eq!(owner.get().await, Some(key));
    }

    #[test]
    fn test_zero_partitions_clamped() {
        let queues: PartitionedQueue<String> = PartitionedQueue::new(0, BackoffPolicy::default());
        assert_eq!(queues.partitions(), 1);
    }
}
