use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::types::{BatchArtifact, CompletedJob, ErrorNotice, JobId, JobRecord, PipelineState};

#[derive(Default)]
struct Payloads {
    inputs: HashMap<JobId, Bytes>,
    outputs: HashMap<JobId, Bytes>,
}

/// Process-wide store of photo jobs and pipeline state.
///
/// The observable [`PipelineState`] lives in a `watch` channel: every
/// mutation is applied under its write lock and subscribers are woken only
/// when something actually changed. Image payloads are kept in a separate
/// map so large buffers never travel through subscriptions.
///
/// No operation fails. Mutations addressed at unknown ids are no-ops.
pub struct PhotoRegistry {
    state: watch::Sender<PipelineState>,
    // Lock order: the watch lock (inside `send_if_modified`) may be held
    // while taking this one, never the reverse.
    payloads: Mutex<Payloads>,
    error_generation: AtomicU64,
}

impl PhotoRegistry {
    /// Create an empty registry with `active_style` selected.
    pub fn new(active_style: impl Into<String>) -> Self {
        let (state, _) = watch::channel(PipelineState {
            active_style: active_style.into(),
            ..Default::default()
        });
        Self {
            state,
            payloads: Mutex::new(Payloads::default()),
            error_generation: AtomicU64::new(0),
        }
    }

    fn payloads(&self) -> MutexGuard<'_, Payloads> {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A consistent snapshot of the observable state.
    pub fn read(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Receive a notification (and the latest state) on every change.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    // ── Job records ─────────────────────────────────────────────────

    /// Insert a record at the front (most recent first). A record whose id
    /// is already present is ignored.
    pub fn append(&self, record: JobRecord) {
        self.state.send_if_modified(|state| {
            if state.job(&record.id).is_some() {
                return false;
            }
            state.jobs.insert(0, record);
            true
        });
    }

    /// Replace the record with `id` by `updater(old)`. The id itself cannot
    /// be changed. Returns whether a record was found.
    pub fn replace<F>(&self, id: &str, updater: F) -> bool
    where
        F: FnOnce(&JobRecord) -> JobRecord,
    {
        self.state.send_if_modified(|state| {
            let Some(slot) = state.jobs.iter_mut().find(|j| j.id == id) else {
                return false;
            };
            let mut next = updater(slot);
            next.id = slot.id.clone();
            let changed = next != *slot;
            *slot = next;
            changed
        })
    }

    /// Remove the record with `id` and both of its payloads.
    /// Returns whether a record was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.state.send_if_modified(|state| {
            let before = state.jobs.len();
            state.jobs.retain(|j| j.id != id);
            state.jobs.len() != before
        });
        let mut payloads = self.payloads();
        payloads.inputs.remove(id);
        payloads.outputs.remove(id);
        removed
    }

    /// Mark a busy job as finished and store its output payload, as one
    /// step. Returns `false` (and stores nothing) when the job is unknown
    /// or already resolved.
    pub fn resolve_job(&self, id: &str, output: Bytes) -> bool {
        self.state.send_if_modified(|state| {
            let Some(job) = state.jobs.iter_mut().find(|j| j.id == id && j.busy) else {
                return false;
            };
            job.busy = false;
            self.payloads().outputs.insert(id.to_string(), output);
            true
        })
    }

    // ── Payloads ────────────────────────────────────────────────────

    pub fn put_input(&self, id: &str, bytes: Bytes) {
        self.payloads().inputs.insert(id.to_string(), bytes);
    }

    pub fn input(&self, id: &str) -> Option<Bytes> {
        self.payloads().inputs.get(id).cloned()
    }

    pub fn output(&self, id: &str) -> Option<Bytes> {
        self.payloads().outputs.get(id).cloned()
    }

    /// All finished jobs in display order, paired with their payloads.
    ///
    /// Taken under the state read lock, so the result reflects a single
    /// point in time. Jobs missing either payload are skipped.
    pub fn completed_snapshot(&self) -> Vec<CompletedJob> {
        let state = self.state.borrow();
        let payloads = self.payloads();
        state
            .jobs
            .iter()
            .filter(|j| !j.busy)
            .filter_map(|j| {
                Some(CompletedJob {
                    id: j.id.clone(),
                    input: payloads.inputs.get(&j.id)?.clone(),
                    output: payloads.outputs.get(&j.id)?.clone(),
                })
            })
            .collect()
    }

    // ── Scalars ─────────────────────────────────────────────────────

    pub fn set_style(&self, key: impl Into<String>) {
        let key = key.into();
        self.state.send_if_modified(|state| {
            if state.active_style == key {
                return false;
            }
            state.active_style = key;
            true
        });
    }

    pub fn set_custom_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.state.send_if_modified(|state| {
            if state.custom_prompt == prompt {
                return false;
            }
            state.custom_prompt = prompt;
            true
        });
    }

    pub fn set_artifact(&self, artifact: Arc<BatchArtifact>) {
        self.state.send_modify(|state| state.artifact = Some(artifact));
    }

    /// Drop the current artifact handle.
    pub fn clear_artifact(&self) {
        self.state.send_if_modified(|state| state.artifact.take().is_some());
    }

    /// Show `message`, superseding any current error. Returns the notice's
    /// generation for use with [`clear_error_if`](Self::clear_error_if).
    pub fn raise_error(&self, message: impl Into<String>) -> u64 {
        let generation = self.error_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let message = message.into();
        self.state.send_modify(|state| {
            state.error = Some(ErrorNotice {
                message,
                generation,
            })
        });
        generation
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// Clear the error only if it is still the one with `generation`.
    pub fn clear_error_if(&self, generation: u64) -> bool {
        self.state.send_if_modified(|state| {
            if state.error.as_ref().map(|e| e.generation) == Some(generation) {
                state.error = None;
                true
            } else {
                false
            }
        })
    }

    // ── Batch guard ─────────────────────────────────────────────────

    /// Atomically set the batch-in-progress flag. Returns `None` if it was
    /// already set. The flag is cleared when the guard is dropped.
    pub fn try_begin_batch(&self) -> Option<BatchGuard<'_>> {
        let acquired = self.state.send_if_modified(|state| {
            if state.batch_in_progress {
                return false;
            }
            state.batch_in_progress = true;
            true
        });
        acquired.then_some(BatchGuard { registry: self })
    }
}

/// Holds the batch-in-progress flag; releases it on drop.
#[must_use = "the batch flag is released as soon as the guard is dropped"]
pub struct BatchGuard<'a> {
    registry: &'a PhotoRegistry,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .state
            .send_if_modified(|state| std::mem::replace(&mut state.batch_in_progress, false));
    }
}
