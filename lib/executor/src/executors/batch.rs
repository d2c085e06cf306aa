use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use hive_gateway_config::subschema::{BatchingConfig, FlushScheduleConfig};
use indexmap::{map::Entry, IndexMap};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::{
    execution_request::ExecutionRequest,
    executors::{
        common::{BatchExecutor, BatchExecutorArc, Executor, ExecutorResponse},
        dedupe::{ABuildHasher, DedupKey},
        error::ExecutorError,
        merge_requests::MergingBatchExecutor,
    },
    plugins::hooks::on_fetch::{emit_fetch, FetchEvent},
};

/// When a batch window is closed and sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FlushSchedule {
    /// Once the task opening the window has polled its other ready futures.
    #[default]
    NextTick,
    Ticks(usize),
    Delay(Duration),
}

impl FlushSchedule {
    async fn wait(&self) {
        match self {
            FlushSchedule::NextTick => tokio::task::yield_now().await,
            FlushSchedule::Ticks(ticks) => {
                for _ in 0..(*ticks).max(1) {
                    tokio::task::yield_now().await;
                }
            }
            FlushSchedule::Delay(delay) => tokio::time::sleep(*delay).await,
        }
    }
}

impl From<&FlushScheduleConfig> for FlushSchedule {
    fn from(config: &FlushScheduleConfig) -> Self {
        match config {
            FlushScheduleConfig::NextTick => FlushSchedule::NextTick,
            FlushScheduleConfig::Ticks(ticks) => FlushSchedule::Ticks(*ticks),
            FlushScheduleConfig::Delay(delay) => FlushSchedule::Delay(*delay),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchingOptions {
    /// Distinct requests per batch. A window reaching it is sent right away.
    pub max_batch_size: Option<usize>,
    pub flush: FlushSchedule,
}

impl From<&BatchingConfig> for BatchingOptions {
    fn from(config: &BatchingConfig) -> Self {
        BatchingOptions {
            max_batch_size: config.max_batch_size.filter(|size| *size > 0),
            flush: FlushSchedule::from(&config.flush),
        }
    }
}

type Waiter = oneshot::Sender<Result<ExecutorResponse, ExecutorError>>;

struct PendingRequest {
    request: ExecutionRequest,
    waiters: Vec<Waiter>,
}

type PendingRequests = IndexMap<DedupKey, PendingRequest, ABuildHasher>;

/// Requests collected since the last flush.
///
/// `id` changes on every flush, so a scheduled flush only ever closes the window it was
/// scheduled for.
#[derive(Default)]
struct BatchWindow {
    id: u64,
    entries: PendingRequests,
}

impl BatchWindow {
    fn take(&mut self) -> PendingRequests {
        self.id = self.id.wrapping_add(1);
        mem::take(&mut self.entries)
    }

    fn take_if(&mut self, id: u64) -> Option<PendingRequests> {
        (self.id == id && !self.entries.is_empty()).then(|| self.take())
    }
}

fn lock(window: &Mutex<BatchWindow>) -> MutexGuard<'_, BatchWindow> {
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coalesces the requests issued within one window into a single [`BatchExecutor`] call.
///
/// Identical requests of a window (see [`DedupKey`]) are sent once and every caller gets the
/// same result. Nothing is cached across windows.
///
/// The caller opening a window waits for the flush schedule in its own task before closing
/// it, so requests issued by sibling futures of that task (`join_all`) land in one window on
/// any runtime flavor. The batch itself is sent from a spawned task and completes for the
/// remaining callers even when one of them is cancelled.
pub struct BatchingExecutor {
    inner: BatchExecutorArc,
    options: BatchingOptions,
    window: Arc<Mutex<BatchWindow>>,
}

impl BatchingExecutor {
    pub fn new(inner: BatchExecutorArc, options: BatchingOptions) -> Self {
        BatchingExecutor {
            inner,
            options,
            window: Arc::new(Mutex::new(BatchWindow::default())),
        }
    }

    /// Batches over a plain executor, merging each batch into as few calls as possible.
    pub fn merging<E: Executor + 'static>(executor: E, options: BatchingOptions) -> Self {
        Self::new(Arc::new(MergingBatchExecutor::new(executor)), options)
    }

    pub fn options(&self) -> &BatchingOptions {
        &self.options
    }
}

#[async_trait]
impl Executor for BatchingExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorResponse, ExecutorError> {
        let key = DedupKey::new(&request);
        let (sender, receiver) = oneshot::channel();

        let (opened, full_window) = {
            let mut window = lock(&self.window);
            let opened = window.entries.is_empty().then_some(window.id);

            match window.entries.entry(key) {
                Entry::Occupied(mut entry) => {
                    trace!("request deduplicated within the batch window");
                    entry.get_mut().waiters.push(sender);
                }
                Entry::Vacant(entry) => {
                    entry.insert(PendingRequest {
                        request,
                        waiters: vec![sender],
                    });
                }
            }

            let reached_max = self
                .options
                .max_batch_size
                .is_some_and(|max| window.entries.len() >= max);
            (opened, reached_max.then(|| window.take()))
        };

        if let Some(entries) = full_window {
            tokio::spawn(dispatch(self.inner.clone(), entries));
        } else if let Some(id) = opened {
            let flush = PendingFlush {
                window: self.window.clone(),
                inner: self.inner.clone(),
                id,
                flushed: false,
            };
            self.options.flush.wait().await;
            flush.close();
        }

        receiver.await.unwrap_or(Err(ExecutorError::BatchDropped))
    }
}

/// The flush owed to a window by the caller that opened it.
///
/// Dropped before [`PendingFlush::close`] ran (the caller was cancelled while waiting), it
/// hands the flush over to a spawned task so the other callers of the window are answered.
struct PendingFlush {
    window: Arc<Mutex<BatchWindow>>,
    inner: BatchExecutorArc,
    id: u64,
    flushed: bool,
}

impl PendingFlush {
    fn close(mut self) {
        self.flushed = true;
        let entries = lock(&self.window).take_if(self.id);
        if let Some(entries) = entries {
            tokio::spawn(dispatch(self.inner.clone(), entries));
        }
    }
}

impl Drop for PendingFlush {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("batch window abandoned outside of a runtime");
            return;
        };
        let window = self.window.clone();
        let inner = self.inner.clone();
        let id = self.id;
        runtime.spawn(async move {
            let entries = lock(&window).take_if(id);
            if let Some(entries) = entries {
                dispatch(inner, entries).await;
            }
        });
    }
}

async fn dispatch(inner: BatchExecutorArc, entries: PendingRequests) {
    let (requests, waiters): (Vec<ExecutionRequest>, Vec<Vec<Waiter>>) = entries
        .into_values()
        .map(|pending| (pending.request, pending.waiters))
        .unzip();

    let Some(first) = requests.first() else {
        return;
    };
    let context = first.context.clone();
    let subschema_name = first.subschema_name().to_string();
    let expected = requests.len();
    debug!(
        subschema = subschema_name.as_str(),
        batch_size = expected,
        "dispatching batch"
    );

    let started_at = Instant::now();
    let outcome = match inner.execute_batch(requests).await {
        Ok(responses) if responses.len() != expected => {
            Err(ExecutorError::BatchCardinalityMismatch {
                expected,
                received: responses.len(),
            })
        }
        outcome => outcome,
    };

    emit_fetch(
        &context,
        &FetchEvent {
            subschema_name: subschema_name.clone(),
            batch_size: expected,
            batched: true,
            duration: started_at.elapsed(),
            error: outcome.as_ref().err().cloned(),
        },
    );

    match outcome {
        Ok(responses) => {
            for (response, waiters) in responses.into_iter().zip(waiters) {
                deliver(response, waiters);
            }
        }
        Err(err) => {
            if err.is_configuration_error() {
                error!(
                    subschema = subschema_name.as_str(),
                    error = %err,
                    "batch executor broke the one response per request contract"
                );
            } else {
                warn!(
                    subschema = subschema_name.as_str(),
                    error = %err,
                    "batch failed"
                );
            }
            for waiter in waiters.into_iter().flatten() {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }
}

fn deliver(response: ExecutorResponse, mut waiters: Vec<Waiter>) {
    match response {
        ExecutorResponse::Single(result) => {
            for waiter in waiters {
                let _ = waiter.send(Ok(ExecutorResponse::Single(result.clone())));
            }
        }
        ExecutorResponse::Stream(stream) if waiters.len() == 1 => {
            if let Some(waiter) = waiters.pop() {
                let _ = waiter.send(Ok(ExecutorResponse::Stream(stream)));
            }
        }
        ExecutorResponse::Stream(mut stream) => {
            let mut senders = Vec::with_capacity(waiters.len());
            for waiter in waiters {
                let (sender, receiver) = mpsc::unbounded();
                if waiter
                    .send(Ok(ExecutorResponse::Stream(receiver.boxed())))
                    .is_ok()
                {
                    senders.push(sender);
                }
            }

            tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    senders.retain(|sender| sender.unbounded_send(item.clone()).is_ok());
                    if senders.is_empty() {
                        break;
                    }
                }
            });
        }
    }
}
