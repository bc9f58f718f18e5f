// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The bounded queue of addresses awaiting a connection attempt

use std::net::SocketAddr;

use granary::concurrency::{
    mpsc_bounded, watch, MpscReceiver, MpscSender, WatchReceiver, WatchSender,
};
use tokio::sync::mpsc::error::TrySendError;

/// The queue was aborted
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct QueueAborted;

/// Outcome of a non-blocking offer
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Offer {
    Queued,
    Full,
    Aborted,
}

/// A bounded FIFO of candidate addresses. Producers wait while the queue is full,
/// the single consumer waits while it's empty. [CandidateQueue::abort] wakes
/// both sides with [QueueAborted]
pub(crate) struct CandidateQueue {
    tx: MpscSender<SocketAddr>,
    rx: tokio::sync::Mutex<MpscReceiver<SocketAddr>>,
    aborted: WatchSender<bool>,
    // keeps the abort channel open regardless of waiters
    _aborted_rx: WatchReceiver<bool>,
}

impl CandidateQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc_bounded(capacity.max(1));
        let (aborted, aborted_rx) = watch(false);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            aborted,
            _aborted_rx: aborted_rx,
        }
    }

    /// Enqueue, waiting for room
    pub(crate) async fn push(&self, address: SocketAddr) -> Result<(), QueueAborted> {
        let mut aborted = self.aborted.subscribe();
        if *aborted.borrow() {
            return Err(QueueAborted);
        }
        tokio::select! {
            biased;
            _ = aborted.wait_for(|aborted| *aborted) => Err(QueueAborted),
            sent = self.tx.send(address) => sent.map_err(|_| QueueAborted),
        }
    }

    /// Enqueue without waiting
    pub(crate) fn offer(&self, address: SocketAddr) -> Offer {
        if self.is_aborted() {
            return Offer::Aborted;
        }
        match self.tx.try_send(address) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Aborted,
        }
    }

    /// Dequeue, waiting for an address
    pub(crate) async fn pop(&self) -> Result<SocketAddr, QueueAborted> {
        let mut aborted = self.aborted.subscribe();
        if *aborted.borrow() {
            return Err(QueueAborted);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = aborted.wait_for(|aborted| *aborted) => Err(QueueAborted),
            address = rx.recv() => address.ok_or(QueueAborted),
        }
    }

    /// Wake every waiter with [QueueAborted]. Later operations fail immediately
    pub(crate) fn abort(&self) {
        self.aborted.send_replace(true);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        *self.aborted.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary::concurrency::{sleep, spawn, Duration};
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[granary::concurrency::test]
    async fn fifo_order() {
        let queue = CandidateQueue::new(4);
        queue.push(addr(1)).await.unwrap();
        queue.push(addr(2)).await.unwrap();
        assert_eq!(Offer::Queued, queue.offer(addr(3)));
        assert_eq!(Ok(addr(1)), queue.pop().await);
        assert_eq!(Ok(addr(2)), queue.pop().await);
        assert_eq!(Ok(addr(3)), queue.pop().await);
    }

    #[granary::concurrency::test]
    async fn full_queue_rejects_offers() {
        let queue = CandidateQueue::new(1);
        assert_eq!(Offer::Queued, queue.offer(addr(1)));
        assert_eq!(Offer::Full, queue.offer(addr(2)));
    }

    #[granary::concurrency::test]
    async fn abort_wakes_waiting_consumer_and_producer() {
        let queue = Arc::new(CandidateQueue::new(1));
        queue.push(addr(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            spawn(async move { queue.push(addr(2)).await })
        };
        sleep(Duration::from_millis(10)).await;
        queue.abort();
        assert_eq!(Err(QueueAborted), producer.await.unwrap());

        // aborted before popping, so the queued address is never delivered
        assert_eq!(Err(QueueAborted), queue.pop().await);
        assert_eq!(Offer::Aborted, queue.offer(addr(3)));
    }

    #[granary::concurrency::test]
    async fn abort_wakes_an_idle_consumer() {
        let queue = Arc::new(CandidateQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            spawn(async move { queue.pop().await })
        };
        sleep(Duration::from_millis(10)).await;
        queue.abort();
        assert_eq!(Err(QueueAborted), consumer.await.unwrap());
    }
}
