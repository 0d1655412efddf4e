//! Terminal storage for records that could not be published.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::OutboxRecord;

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub record: OutboxRecord,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Receives records whose retries are exhausted.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    async fn store(&self, letter: DeadLetter);
}

/// Dead letters kept in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.letters.read().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn store(&self, letter: DeadLetter) {
        if let Ok(mut letters) = self.letters.write() {
            letters.push(letter);
        }
    }
}
