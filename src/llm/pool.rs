//! Credential pool: least-used selection over a fixed set of provider keys.
//!
//! Selection and the usage increment happen under one lock, so two concurrent
//! requests never both observe the same minimum and pick the same key.

use crate::error::PoolError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One provider key, identified by its position in configured order.
#[derive(Clone)]
pub struct Credential {
    index: usize,
    secret: Arc<str>,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Read-only snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub total_keys: usize,
    pub key_usage_stats: BTreeMap<usize, u64>,
    pub key_failure_stats: BTreeMap<usize, u64>,
    pub current_key_index: usize,
    pub total_requests: u64,
}

#[derive(Debug)]
struct PoolState {
    usage: Vec<u64>,
    failures: Vec<u64>,
    current: usize,
}

#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from keys in configured order. Blank keys are skipped.
    pub fn new<I, S>(keys: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials: Vec<Credential> = keys
            .into_iter()
            .map(|key| key.as_ref().trim().to_string())
            .filter(|key| !key.is_empty())
            .enumerate()
            .map(|(index, key)| Credential {
                index,
                secret: Arc::from(key),
            })
            .collect();

        if credentials.is_empty() {
            return Err(PoolError::Exhausted);
        }

        let size = credentials.len();
        Ok(Self {
            credentials,
            state: Mutex::new(PoolState {
                usage: vec![0; size],
                failures: vec![0; size],
                current: 0,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Plain counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick the least-used credential (lowest index on ties) and count it.
    pub fn select(&self) -> Credential {
        let mut state = self.lock();
        let mut chosen = 0;
        for (index, &count) in state.usage.iter().enumerate() {
            if count < state.usage[chosen] {
                chosen = index;
            }
        }
        state.usage[chosen] += 1;
        state.current = chosen;
        drop(state);

        tracing::debug!(key_index = chosen, "selected provider credential");
        self.credentials[chosen].clone()
    }

    /// Count a provider call made with `credential` that failed.
    pub fn record_failure(&self, credential: &Credential) {
        let mut state = self.lock();
        if let Some(count) = state.failures.get_mut(credential.index) {
            *count += 1;
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            total_keys: self.credentials.len(),
            key_usage_stats: state.usage.iter().copied().enumerate().collect(),
            key_failure_stats: state.failures.iter().copied().enumerate().collect(),
            current_key_index: state.current,
            total_requests: state.usage.iter().sum(),
        }
    }

    /// Usage counts only, in configured order.
    pub fn usage_stats(&self) -> BTreeMap<usize, u64> {
        self.lock().usage.iter().copied().enumerate().collect()
    }
}
