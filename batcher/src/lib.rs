/*!
Infrastructure for batching items recorded on foreground threads and processing them on a background worker.

A channel is created with [`bounded`], which returns a [`Sender`] and a [`Receiver`]. Items are pushed through the sender into a [`Channel`] under a short-lived lock. The receiver periodically swaps the whole channel for an empty one and hands the filled one to a callback, so a batch is never observed while it's still being written to.

The receiver can run on a fixed interval (see [`Receiver::with_interval`]) or as soon as items arrive. Closing the sender gives the receiver one last chance to process whatever remains before it exits.
*/

use crate::internal_metrics::InternalMetrics;
use std::{
    any::Any,
    cmp,
    future::{self, Future},
    mem,
    panic::{self, AssertUnwindSafe, UnwindSafe},
    pin::{pin, Pin},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    task,
    task::{Context, Poll},
    thread,
    time::{Duration, Instant},
};

mod internal_metrics;

pub use self::internal_metrics::ChannelMetrics;

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/**
A container that items are accumulated into between batches.
*/
pub trait Channel {
    type Item;

    fn new() -> Self;

    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized,
    {
        let _ = capacity;

        Self::new()
    }

    fn push(&mut self, item: Self::Item);

    /**
    The number of distinct entries in the channel.

    This is the value compared against the maximum capacity of the channel.
    */
    fn remaining(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /**
    Whether pushing `item` would add a new entry to the channel rather than fold into an existing one.

    Items that don't grow the channel are accepted even when it's at capacity.
    */
    fn grows_with(&self, item: &Self::Item) -> bool {
        let _ = item;

        true
    }

    fn clear(&mut self);
}

impl<T> Channel for Vec<T> {
    type Item = T;

    fn new() -> Self {
        Vec::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn push(&mut self, item: Self::Item) {
        self.push(item);
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn clear(&mut self) {
        self.clear()
    }
}

/**
Create a channel that holds at most `max_capacity` entries between batches.
*/
pub fn bounded<T: Channel>(max_capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        metrics: Default::default(),
        state: Mutex::new(State {
            next_batch: Batch::new(),
            is_open: true,
            is_in_batch: false,
            is_flush_requested: false,
            is_abandoned: false,
            is_stopped: false,
            on_stopped: Watchers::new(),
        }),
    });

    (
        Sender {
            max_capacity,
            shared: shared.clone(),
        },
        Receiver {
            interval: None,
            flush_threshold: None,
            idle_delay: Delay::new(Duration::from_millis(1), Duration::from_millis(100)),
            retry: Retry::new(10),
            retry_delay: Delay::new(Duration::from_millis(50), Duration::from_secs(1)),
            capacity: Capacity::new(),
            shared,
        },
    )
}

/**
The foreground half of a channel.
*/
pub struct Sender<T> {
    max_capacity: usize,
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.lock().is_open = false;
    }
}

impl<T: Channel> Sender<T> {
    /**
    Push an item into the channel.

    This method never blocks on the receiver. If the channel is full or closed then the item is dropped and counted in [`Sender::metrics`].
    */
    pub fn send(&self, msg: T::Item) {
        let mut state = self.shared.lock();

        // If the channel is closed then return without adding the message
        if !state.is_open {
            self.shared.metrics.queue_discarded.increment();
            return;
        }

        // If the channel is full then drop new entries; this prevents OOMing
        // when the destination is unavailable or attributes are unbounded
        if state.next_batch.channel.remaining() >= self.max_capacity
            && state.next_batch.channel.grows_with(&msg)
        {
            self.shared.metrics.queue_overflow.increment();
            return;
        }

        state.next_batch.channel.push(msg);
    }

    /**
    Run `watcher` once the items in the channel at the point this call was made have been processed.

    This also asks the receiver to process the channel without waiting for its next interval.
    */
    pub fn on_next_flush(&self, watcher: impl FnOnce() + Send + 'static) {
        let watcher = Box::new(watcher);

        let mut state = self.shared.lock();

        // If:
        // - We're not in a batch and
        //   - the next batch is empty (there's no data) or
        //   - the state is closed
        // Then:
        // - Call the watcher without scheduling it; there's nothing to wait for
        if !state.is_in_batch && (state.next_batch.channel.is_empty() || !state.is_open) {
            drop(state);

            watcher();
        }
        // If there's active data to flush then schedule the watcher
        else {
            state.is_flush_requested = true;
            state.next_batch.watchers.push(watcher);
        }
    }

    /**
    Run `watcher` once the receiver has exited.
    */
    pub fn on_stopped(&self, watcher: impl FnOnce() + Send + 'static) {
        let watcher = Box::new(watcher);

        let mut state = self.shared.lock();

        if state.is_stopped {
            drop(state);

            watcher();
        } else {
            state.on_stopped.push(watcher);
        }
    }

    /**
    Stop accepting new items.

    The receiver will process any remaining items in one last batch and then exit.
    */
    pub fn close(&self) {
        self.shared.lock().is_open = false;
    }

    /**
    Stop accepting new items and discard any that haven't been processed yet.

    A batch that's currently being processed won't be retried if it fails.
    */
    pub fn abandon(&self) {
        let (discarded, watchers) = {
            let mut state = self.shared.lock();

            state.is_open = false;
            state.is_abandoned = true;

            let discarded = state.next_batch.channel.remaining();
            state.next_batch.channel.clear();

            (discarded, mem::take(&mut state.next_batch.watchers))
        };

        self.shared.metrics.queue_discarded.increment_by(discarded);

        watchers.notify();
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_open
    }

    /**
    Sample the channel's own metrics.
    */
    pub fn metrics(&self) -> ChannelMetrics {
        self.shared.sample_metrics()
    }
}

/**
The background half of a channel.
*/
pub struct Receiver<T> {
    interval: Option<Duration>,
    flush_threshold: Option<usize>,
    idle_delay: Delay,
    retry: Retry,
    retry_delay: Delay,
    capacity: Capacity,
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let (pending, stopped) = {
            let mut state = self.shared.lock();

            state.is_open = false;
            state.is_stopped = true;

            (
                mem::take(&mut state.next_batch.watchers),
                mem::take(&mut state.on_stopped),
            )
        };

        pending.notify();
        stopped.notify();
    }
}

/**
An error processing a batch.

The error may carry a part of the batch that should be retried.
*/
pub struct BatchError<T> {
    retryable: T,
}

impl<T: Channel> BatchError<T> {
    pub fn retry(_: impl std::error::Error + Send + Sync + 'static, retryable: T) -> Self {
        BatchError { retryable }
    }

    pub fn no_retry(_: impl std::error::Error + Send + Sync + 'static) -> Self {
        BatchError {
            retryable: T::new(),
        }
    }

    pub fn into_retryable(self) -> T {
        self.retryable
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BatchError<U> {
        BatchError {
            retryable: f(self.retryable),
        }
    }
}

impl<T: Channel> Receiver<T> {
    /**
    Only process batches once every `interval`, unless a flush is requested or the channel is closed.

    By default, batches are processed as soon as items are available.
    */
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /**
    Process a batch before the next interval once the channel holds at least `threshold` entries.
    */
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = Some(threshold);
        self
    }

    /**
    The number of times a failed batch is retried before it's dropped.
    */
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.retry = Retry::new(max);
        self
    }

    /**
    Sample the channel's own metrics.
    */
    pub fn metrics(&self) -> ChannelMetrics {
        self.shared.sample_metrics()
    }

    pub fn blocking_exec(
        self,
        mut on_batch: impl FnMut(T) -> Result<(), BatchError<T>>,
    ) -> Result<(), Error> {
        static WAKER: OnceLock<Arc<NeverWake>> = OnceLock::new();

        // A waker that does nothing; the tasks it runs are fully
        // synchronous so there's never any notifications to issue
        struct NeverWake;

        impl task::Wake for NeverWake {
            fn wake(self: Arc<Self>) {}
        }

        let mut fut = pin!(self.exec(
            |delay| future::ready(thread::sleep(delay)),
            move |batch| future::ready(on_batch(batch)),
        ));

        let waker = WAKER.get_or_init(|| Arc::new(NeverWake)).clone().into();
        let mut cx = task::Context::from_waker(&waker);

        loop {
            match fut.as_mut().poll(&mut cx) {
                task::Poll::Ready(r) => return r,
                task::Poll::Pending => continue,
            }
        }
    }

    pub async fn exec<
        FBatch: Future<Output = Result<(), BatchError<T>>>,
        FWait: Future<Output = ()>,
    >(
        mut self,
        mut wait: impl FnMut(Duration) -> FWait,
        mut on_batch: impl FnMut(T) -> FBatch,
    ) -> Result<(), Error> {
        // Under the lock all we do is push onto a pre-allocated channel
        // and replace it with another pre-allocated channel
        let mut next_batch = Batch::new();
        let mut next_tick = self.interval.map(|interval| Instant::now() + interval);

        loop {
            let now = Instant::now();
            let tick_due = next_tick.map(|tick| now >= tick).unwrap_or(true);

            let (current_batch, is_open) = {
                let mut state = self.shared.lock();

                if state.is_abandoned {
                    return Ok(());
                }

                // NOTE: A closed channel is always due so any last batch is emitted
                let is_due = tick_due
                    || state.is_flush_requested
                    || !state.is_open
                    || self
                        .flush_threshold
                        .map(|threshold| state.next_batch.channel.remaining() >= threshold)
                        .unwrap_or(false);

                if !is_due {
                    (None, state.is_open)
                } else if state.next_batch.channel.remaining() > 0 {
                    state.is_flush_requested = false;
                    state.is_in_batch = true;

                    (
                        Some(mem::replace(
                            &mut state.next_batch,
                            mem::take(&mut next_batch),
                        )),
                        state.is_open,
                    )
                } else {
                    state.is_flush_requested = false;
                    state.is_in_batch = false;

                    let watchers = mem::take(&mut state.next_batch.watchers);

                    (
                        Some(Batch {
                            channel: T::new(),
                            watchers,
                        }),
                        state.is_open,
                    )
                }
            };

            if let (Some(tick), Some(interval)) = (next_tick, self.interval) {
                if tick_due {
                    next_tick = Some(if tick + interval > now {
                        tick + interval
                    } else {
                        now + interval
                    });
                }
            }

            match current_batch {
                Some(mut current_batch) if current_batch.channel.remaining() > 0 => {
                    self.retry.reset();
                    self.retry_delay.reset();
                    self.idle_delay.reset();

                    // Re-allocate our next buffer outside of the lock
                    next_batch = Batch {
                        channel: T::with_capacity(
                            self.capacity.next(current_batch.channel.remaining()),
                        ),
                        watchers: Watchers::new(),
                    };

                    // Emit the batch, taking care not to panic
                    loop {
                        match panic::catch_unwind(AssertUnwindSafe(|| {
                            on_batch(current_batch.channel)
                        })) {
                            Ok(on_batch) => match CatchUnwind(AssertUnwindSafe(on_batch)).await {
                                Ok(Ok(())) => {
                                    self.shared.metrics.queue_batch_processed.increment();
                                }
                                Ok(Err(BatchError { retryable })) => {
                                    self.shared.metrics.queue_batch_failed.increment();

                                    if retryable.remaining() > 0
                                        && !self.shared.is_abandoned()
                                        && self.retry.next()
                                    {
                                        // Delay a bit before trying again; this gives the external service
                                        // a chance to get itself together
                                        wait(self.retry_delay.next()).await;

                                        current_batch = Batch {
                                            channel: retryable,
                                            watchers: current_batch.watchers,
                                        };

                                        self.shared.metrics.queue_batch_retry.increment();
                                        continue;
                                    }
                                }
                                Err(_) => {
                                    self.shared.metrics.queue_batch_panicked.increment();
                                }
                            },
                            Err(_) => {
                                self.shared.metrics.queue_batch_panicked.increment();
                            }
                        }

                        break;
                    }

                    current_batch.watchers.notify();
                }
                Some(current_batch) => {
                    current_batch.watchers.notify();

                    // If the channel is closed then exit the loop and return; this will
                    // drop the receiver and notify anything waiting for it to stop
                    if !is_open {
                        return Ok(());
                    }

                    let delay = self.idle_wait(next_tick);
                    wait(delay).await;
                }
                None => {
                    let delay = self.idle_wait(next_tick);
                    wait(delay).await;
                }
            }
        }
    }

    fn idle_wait(&mut self, next_tick: Option<Instant>) -> Duration {
        let delay = self.idle_delay.next();

        match next_tick {
            Some(tick) => cmp::min(delay, tick.saturating_duration_since(Instant::now())),
            None => delay,
        }
    }
}

/**
A future that catches panics raised while it's polled.

A panic is returned as an `Err` carrying its payload, like [`std::panic::catch_unwind`].
*/
pub struct CatchUnwind<F>(pub F);

impl<F: Future + UnwindSafe> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `CatchUnwind` uses structural pinning
        let f = unsafe { Pin::map_unchecked_mut(self, |x| &mut x.0) };

        panic::catch_unwind(AssertUnwindSafe(|| f.poll(cx)))?.map(Ok)
    }
}

struct Delay {
    current: Duration,
    step: Duration,
    max: Duration,
}

impl Delay {
    fn new(step: Duration, max: Duration) -> Delay {
        Delay {
            current: Duration::ZERO,
            step,
            max,
        }
    }

    fn reset(&mut self) {
        self.current = Duration::ZERO
    }

    fn next(&mut self) -> Duration {
        self.current = cmp::min(self.current * 2 + self.step, self.max);
        self.current
    }
}

const CAPACITY_WINDOW: usize = 16;

struct Capacity([usize; CAPACITY_WINDOW], usize);

impl Capacity {
    fn new() -> Self {
        Capacity([1; CAPACITY_WINDOW], 0)
    }

    fn next(&mut self, last_len: usize) -> usize {
        self.0[self.1 % CAPACITY_WINDOW] = last_len;
        self.1 = self.1.wrapping_add(1);

        self.0.iter().copied().max().unwrap_or(last_len)
    }
}

struct Retry {
    current: u32,
    max: u32,
}

impl Retry {
    fn new(max: u32) -> Self {
        Retry { current: 0, max }
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    fn next(&mut self) -> bool {
        self.current += 1;
        self.current <= self.max
    }
}

struct Shared<T> {
    metrics: InternalMetrics,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_abandoned(&self) -> bool {
        self.lock().is_abandoned
    }
}

impl<T: Channel> Shared<T> {
    fn sample_metrics(&self) -> ChannelMetrics {
        let queue_length = self.lock().next_batch.channel.remaining();

        self.metrics.sample(queue_length)
    }
}

struct State<T> {
    next_batch: Batch<T>,
    is_open: bool,
    is_in_batch: bool,
    is_flush_requested: bool,
    is_abandoned: bool,
    is_stopped: bool,
    on_stopped: Watchers,
}

struct Batch<T> {
    channel: T,
    watchers: Watchers,
}

impl<T: Channel> Batch<T> {
    fn new() -> Self {
        Batch {
            channel: T::new(),
            watchers: Watchers::new(),
        }
    }
}

impl<T: Channel> Default for Batch<T> {
    fn default() -> Self {
        Batch::new()
    }
}

struct Watchers(Vec<Watcher>);

type Watcher = Box<dyn FnOnce() + Send>;

impl Default for Watchers {
    fn default() -> Self {
        Watchers::new()
    }
}

impl Watchers {
    fn new() -> Self {
        Watchers(Vec::new())
    }

    fn push(&mut self, watcher: Watcher) {
        self.0.push(watcher);
    }

    fn notify(self) {
        for watcher in self.0 {
            let _ = panic::catch_unwind(AssertUnwindSafe(watcher));
        }
    }
}

pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;
