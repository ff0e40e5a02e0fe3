//! Bounded, structured fan-out.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

use crate::DEFAULT_CONCURRENCY;

/// Runs a batch of operations with at most `size` in flight at once.
///
/// A batch call returns only after every submitted operation has
/// finished. Operations are peers: there is no priority and no ordering
/// guarantee between them. Error handling is the operation's concern;
/// the pool only collects outputs.
#[derive(Debug, Clone, Copy)]
pub struct BatchPool {
    size: usize,
}

impl BatchPool {
    /// Create a pool running up to `size` operations concurrently.
    ///
    /// A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Maximum number of operations in flight.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `op` for every item and wait for all of them.
    ///
    /// Outputs are returned in completion order, not submission order.
    pub async fn run<I, F, Fut>(&self, items: I, op: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future,
    {
        stream::iter(items)
            .map(op)
            .buffer_unordered(self.size)
            .collect()
            .await
    }

    /// Run `op` for every item and wait for all of them, discarding outputs.
    pub async fn for_each<I, F, Fut>(&self, items: I, op: F)
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = ()>,
    {
        stream::iter(items).for_each_concurrent(self.size, op).await
    }
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
