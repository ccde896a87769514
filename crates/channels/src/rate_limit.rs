//! Per-chat token-bucket rate limiting for inbound messages.
//!
//! Every chat gets its own bucket with `capacity` tokens that refills at
//! `capacity / 60` tokens per second. `admit` never waits: a message that
//! finds the bucket empty is rejected on the spot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

struct Bucket {
    /// Maximum tokens in the bucket (= burst capacity).
    capacity: u32,
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ChatRateLimiter {
    capacity: u32,
    refill_rate: f64,
    /// The map lock is held only to find or insert a bucket; each bucket
    /// has its own lock.
    buckets: Mutex<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl ChatRateLimiter {
    /// `per_minute` messages per chat; zero is treated as one.
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = per_minute.max(1);
        Self {
            capacity,
            refill_rate: capacity as f64 / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket(&self, chat_id: &str) -> Arc<Mutex<Bucket>> {
        let mut buckets = lock(&self.buckets);
        buckets
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(self.capacity, self.refill_rate))))
            .clone()
    }

    /// Consumes one token for `chat_id`. Returns false when the chat is over
    /// its limit.
    pub fn admit(&self, chat_id: &str) -> bool {
        self.admit_at(chat_id, Instant::now())
    }

    fn admit_at(&self, chat_id: &str, now: Instant) -> bool {
        lock(&self.bucket(chat_id)).try_consume(now)
    }

    /// Whole tokens left for `chat_id`.
    pub fn remaining(&self, chat_id: &str) -> u32 {
        let existing = lock(&self.buckets).get(chat_id).cloned();
        match existing {
            Some(bucket) => lock(&bucket).available(Instant::now()),
            None => self.capacity,
        }
    }

    /// Forgets one chat's bucket, or every bucket when `chat_id` is `None`.
    pub fn reset(&self, chat_id: Option<&str>) {
        let mut buckets = lock(&self.buckets);
        match chat_id {
            Some(id) => {
                buckets.remove(id);
            }
            None => buckets.clear(),
        }
    }
}
