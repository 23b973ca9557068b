use serde::{Deserialize, Serialize};

/// Target byte size of one batch under [`BatchStrategy::MaximizeChunk`].
pub const CHUNK_BYTES: usize = 16 * 1024;

/// How a parallel-for job splits its items across workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// As many items per batch as fit in [`CHUNK_BYTES`]. Fewer, larger
    /// batches; best when per-item work is small.
    #[default]
    MaximizeChunk,
    /// One item per batch, spreading work over every available worker.
    MaximizeThreads,
}

impl BatchStrategy {
    /// Minimum number of items a worker takes at once for elements of `T`.
    pub fn batch_size<T>(self) -> usize {
        self.batch_size_for(std::mem::size_of::<T>())
    }

    pub fn batch_size_for(self, element_size: usize) -> usize {
        match self {
            Self::MaximizeChunk => (CHUNK_BYTES / element_size.max(1)).max(1),
            Self::MaximizeThreads => 1,
        }
    }
}
