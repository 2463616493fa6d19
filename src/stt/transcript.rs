//! Transcript aggregate and result-index reconciliation.

use crate::error::{Error, Result};
use crate::stt::messages::RecognitionResult;

/// One reconciled change to the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptUpdate {
    /// Position of the changed result.
    pub index: usize,
    /// The new value at that position.
    pub result: RecognitionResult,
}

/// The evolving sequence of recognition results for one session.
///
/// The service declares a changepoint with each results frame: everything
/// before `result_index` is stable, positions at or after it may change.
/// Finality is monotonic — a result marked final is never overwritten.
#[derive(Debug, Default)]
pub struct Transcript {
    results: Vec<RecognitionResult>,
}

impl Transcript {
    /// Empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Results reconciled so far.
    pub fn results(&self) -> &[RecognitionResult] {
        &self.results
    }

    /// Consume the transcript, yielding the accumulated results.
    pub fn into_results(self) -> Vec<RecognitionResult> {
        self.results
    }

    /// Number of result positions.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no results have arrived.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Apply a results frame: overwrite positions `result_index..` with the
    /// incoming results, appending past the current end.
    ///
    /// The whole frame is rejected (nothing applied) when it would overwrite
    /// an already-final position, or when `result_index` would leave a gap.
    pub fn reconcile(
        &mut self,
        result_index: usize,
        incoming: Vec<RecognitionResult>,
    ) -> Result<Vec<TranscriptUpdate>> {
        if result_index > self.results.len() {
            return Err(Error::Protocol(format!(
                "result_index {result_index} skips past the current transcript length {}",
                self.results.len()
            )));
        }

        let overlap_end = (result_index + incoming.len()).min(self.results.len());
        for index in result_index..overlap_end {
            if self.results[index].is_final {
                return Err(Error::Protocol(format!(
                    "update at index {index} would overwrite a final result"
                )));
            }
        }

        let mut updates = Vec::with_capacity(incoming.len());
        for (offset, result) in incoming.into_iter().enumerate() {
            let index = result_index + offset;
            if index < self.results.len() {
                self.results[index] = result.clone();
            } else {
                self.results.push(result.clone());
            }
            updates.push(TranscriptUpdate { index, result });
        }

        Ok(updates)
    }
}

// =============================================================================
// Tests
// =============================================================================
