use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{StreamError, StreamResult};

/// Append buffer split into one lane per worker.
///
/// Each lane is a `Mutex<Vec<T>>`. A pool worker appends only to the lane
/// matching its [`JobContext::lane`](weft_jobs::JobContext::lane), so two
/// workers never wait on the same lock; threads outside the pool share
/// lane 0 and do serialize on it, as does draining. Order within a lane is
/// preserved; there is no order across lanes.
pub struct LaneStream<T> {
    label: Arc<str>,
    lanes: Arc<[Mutex<Vec<T>>]>,
}

impl<T> Clone for LaneStream<T> {
    fn clone(&self) -> Self {
        Self {
            label: Arc::clone(&self.label),
            lanes: Arc::clone(&self.lanes),
        }
    }
}

impl<T> LaneStream<T> {
    pub fn new(label: impl Into<Arc<str>>, lane_count: usize) -> Self {
        let lanes = (0..lane_count.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>();
        Self {
            label: label.into(),
            lanes: lanes.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn lane(&self, lane: usize) -> StreamResult<MutexGuard<'_, Vec<T>>> {
        self.lanes
            .get(lane)
            .ok_or_else(|| StreamError::LaneOutOfRange {
                stream: self.label.to_string(),
                lane,
                lanes: self.lanes.len(),
            })?
            .lock()
            .map_err(|_| StreamError::Poisoned(self.label.to_string()))
    }

    pub fn push(&self, lane: usize, value: T) -> StreamResult<()> {
        self.lane(lane)?.push(value);
        Ok(())
    }

    pub fn extend(&self, lane: usize, values: impl IntoIterator<Item = T>) -> StreamResult<()> {
        self.lane(lane)?.extend(values);
        Ok(())
    }

    /// Total number of values across all lanes.
    pub fn len(&self) -> StreamResult<usize> {
        let mut total = 0;
        for i in 0..self.lanes.len() {
            total += self.lane(i)?.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> StreamResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Move every value out, lane by lane, into `out`.
    ///
    /// Each lane is emptied atomically, so a value appended concurrently is
    /// either drained now or left for the next drain, never lost.
    pub fn drain_into(&self, out: &mut Vec<T>) -> StreamResult<usize> {
        let before = out.len();
        for i in 0..self.lanes.len() {
            let taken = std::mem::take(&mut *self.lane(i)?);
            out.extend(taken);
        }
        Ok(out.len() - before)
    }

    pub fn clear(&self) -> StreamResult<()> {
        for i in 0..self.lanes.len() {
            self.lane(i)?.clear();
        }
        Ok(())
    }
}

impl<T: Clone> LaneStream<T> {
    /// Copy of one lane's contents.
    pub fn lane_snapshot(&self, lane: usize) -> StreamResult<Vec<T>> {
        Ok(self.lane(lane)?.clone())
    }
}

impl<T> fmt::Debug for LaneStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneStream")
            .field("label", &self.label)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}
