//! Priority-fair inbound scheduling.
//!
//! Decoded frame sets are queued per source address. Each address queue
//! sits in exactly one of [`PRIORITY_LEVELS`] buckets, chosen by the most
//! urgent message it holds. Dequeueing takes one message from the first
//! address in the most urgent non-empty bucket and sends that address to
//! the back of its (possibly new) bucket.
//!
//! Two properties fall out of this:
//!
//! - urgent traffic (deaths, shutdowns) from anyone overtakes bulk traffic
//!   (discovery) from everyone, and
//! - within a priority, sources take turns, so one chatty drone cannot
//!   starve the others.
//!
//! Messages from one source are always processed in arrival order.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use crate::codec::FrameSet;
use crate::config::PRIORITY_LEVELS;

/// Anything with a scheduling priority. 0 is the most urgent.
pub trait Prioritized {
    fn priority(&self) -> u8;
}

impl Prioritized for FrameSet {
    fn priority(&self) -> u8 {
        self.kind.priority()
    }
}

fn bucket_of(priority: u8) -> usize {
    usize::from(priority).min(PRIORITY_LEVELS - 1)
}

#[derive(Debug)]
struct AddrQueue<M> {
    messages: VecDeque<M>,
    /// Bucket the address currently lives in.
    bucket: usize,
}

impl<M: Prioritized> AddrQueue<M> {
    fn min_bucket(&self) -> usize {
        self.messages
            .iter()
            .map(|m| bucket_of(m.priority()))
            .min()
            .unwrap_or(PRIORITY_LEVELS - 1)
    }
}

#[derive(Debug)]
pub struct PacketScheduler<M> {
    buckets: [VecDeque<SocketAddr>; PRIORITY_LEVELS],
    queues: HashMap<SocketAddr, AddrQueue<M>>,
    len: usize,
}

impl<M> Default for PacketScheduler<M> {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| VecDeque::new()),
            queues: HashMap::new(),
            len: 0,
        }
    }
}

impl<M: Prioritized> PacketScheduler<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `msg` from `source`, promoting the source's queue if `msg` is
    /// more urgent than anything it already held.
    pub fn enqueue(&mut self, source: SocketAddr, msg: M) {
        let bucket = bucket_of(msg.priority());
        self.len += 1;

        match self.queues.get_mut(&source) {
            Some(queue) => {
                queue.messages.push_back(msg);
                if bucket < queue.bucket {
                    let old = queue.bucket;
                    queue.bucket = bucket;
                    self.buckets[old].retain(|a| *a != source);
                    self.buckets[bucket].push_back(source);
                }
            }
            None => {
                let mut messages = VecDeque::new();
                messages.push_back(msg);
                self.queues.insert(source, AddrQueue { messages, bucket });
                self.buckets[bucket].push_back(source);
            }
        }
    }

    /// Takes the next message to process, or `None` if nothing is queued.
    pub fn dequeue(&mut self) -> Option<(SocketAddr, M)> {
        let bucket = self.buckets.iter().position(|b| !b.is_empty())?;
        let source = self.buckets[bucket].pop_front()?;
        let queue = self.queues.get_mut(&source)?;
        let msg = queue.messages.pop_front()?;
        self.len -= 1;

        if queue.messages.is_empty() {
            self.queues.remove(&source);
        } else {
            let next = queue.min_bucket();
            queue.bucket = next;
            self.buckets[next].push_back(source);
        }
        Some((source, msg))
    }

    /// Total queued messages.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of sources with queued messages.
    pub fn active_sources(&self) -> usize {
        self.queues.len()
    }

    /// Bucket `source` currently lives in, if it has queued messages.
    pub fn bucket_of_source(&self, source: &SocketAddr) -> Option<usize> {
        self.queues.get(source).map(|q| q.bucket)
    }
}
