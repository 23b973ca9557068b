//! Parallel binding over a plain instance stream.

use std::fmt;
use std::sync::Arc;

use weft_jobs::{BatchStrategy, JobError, JobHandle, JobScheduler};
use weft_stream::{ConsumeMode, InstanceStream, StreamConsumer};

use crate::binding::ScheduleBinding;
use crate::error::{LedgerError, LedgerResult};
use crate::job_data::JobData;
use crate::usage::{RequirementKey, Usage};

/// Per-item handle given to a stream function.
pub struct StreamItem<'a, T> {
    index: usize,
    lane: usize,
    job: &'a str,
    data: &'a JobData,
    consumer: &'a StreamConsumer<T>,
}

impl<'a, T> StreamItem<'a, T> {
    /// Position of the item in the current snapshot.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn data(&self) -> &'a JobData {
        self.data
    }

    /// Carry a value into the next pass. Fails for read-only bindings.
    pub fn continue_with(&self, value: T) -> Result<(), JobError> {
        self.consumer
            .continue_with(self.lane, value)
            .map_err(|e| e.into_job_error(self.job))
    }
}

type ItemFn<T> = dyn Fn(&T, &StreamItem<'_, T>) -> Result<(), JobError> + Send + Sync;

/// Runs a function once per item of an [`InstanceStream`]'s snapshot.
pub struct StreamBinding<T> {
    name: String,
    usage: Usage,
    batch: BatchStrategy,
    each: Arc<ItemFn<T>>,
}

impl<T: Send + Sync + 'static> StreamBinding<T> {
    /// Read-only pass.
    pub fn read<F>(name: impl Into<String>, batch: BatchStrategy, each: F) -> Self
    where
        F: Fn(&T, &StreamItem<'_, T>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            usage: Usage::Read,
            batch,
            each: Arc::new(each),
        }
    }

    /// Update pass: items not continued are gone after the next
    /// consolidation.
    pub fn update<F>(name: impl Into<String>, batch: BatchStrategy, each: F) -> Self
    where
        F: Fn(&T, &StreamItem<'_, T>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            usage: Usage::Update,
            batch,
            each: Arc::new(each),
        }
    }

    pub fn mode(&self) -> ConsumeMode {
        match self.usage {
            Usage::Update => ConsumeMode::Update,
            _ => ConsumeMode::Read,
        }
    }
}

struct ItemState<T> {
    data: Arc<JobData>,
    current: Arc<[T]>,
    consumer: StreamConsumer<T>,
}

impl<T: Send + Sync + 'static> ScheduleBinding for StreamBinding<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn expects(&self) -> Vec<RequirementKey> {
        vec![RequirementKey::of::<InstanceStream<T>>(self.usage)]
    }

    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        let consumer = match self.usage {
            Usage::Update => data.stream_updater::<T>()?,
            Usage::Read => data.stream_reader::<T>()?,
            usage => {
                return Err(LedgerError::InvalidUsage {
                    ledger: data.ledger().to_string(),
                    resource: RequirementKey::of::<InstanceStream<T>>(usage).resource.to_string(),
                    usage,
                })
            }
        }
        .clone();
        let data = Arc::new(data);
        let each = Arc::clone(&self.each);
        let name = self.name.clone();

        Ok(scheduler.schedule_parallel_deferred(
            &self.name,
            depends_on,
            self.batch.batch_size::<T>(),
            move || {
                let current = consumer.current().map_err(|e| e.into_job_error(&name))?;
                let len = current.len();
                Ok((ItemState { data, current, consumer }, len))
            },
            move |state: &ItemState<T>, index, ctx| {
                let item = StreamItem {
                    index,
                    lane: ctx.lane(),
                    job: ctx.job_name(),
                    data: &state.data,
                    consumer: &state.consumer,
                };
                each(&state.current[index], &item)
            },
        ))
    }
}

impl<T> fmt::Debug for StreamBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBinding")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("batch", &self.batch)
            .finish()
    }
}
