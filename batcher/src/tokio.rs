/*!
Run channels in a `tokio` runtime.
*/

use std::{future::Future, io, thread, time::Duration};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::{sync, BatchError, Channel, Receiver, Sender};

/**
Spawn a worker to run the [`Receiver`] on a `tokio` runtime.

If the current thread is a worker of a multi-threaded `tokio` runtime, then the worker will be spawned onto that runtime. Otherwise a single-threaded `tokio` runtime will be set up in a dedicated thread to run it. A current-thread runtime can't make progress on the worker while its only thread is blocked in [`blocking_flush`] or [`blocking_close`], so it's never used.
*/
pub fn spawn<
    T: Channel + Send + 'static,
    F: Future<Output = Result<(), BatchError<T>>> + Send + 'static,
>(
    name: &str,
    receiver: Receiver<T>,
    on_batch: impl FnMut(T) -> F + Send + 'static,
) -> io::Result<()>
where
    T::Item: Send + 'static,
{
    let receive = async move {
        receiver
            .exec(|delay| tokio::time::sleep(delay), on_batch)
            .await
    };

    match Handle::try_current() {
        // If we're on a multi-threaded `tokio` runtime then spawn on it
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            handle.spawn(receive);
        }
        // Otherwise spawn a background thread and run the work there
        _ => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            thread::Builder::new().name(name.into()).spawn(move || {
                let _ = runtime.block_on(receive);
            })?;
        }
    }

    Ok(())
}

/**
Wait for a channel potentially running on a `tokio` thread to process all items active at the point this call was made.

If the current thread is a multi-threaded `tokio` worker then this call will be executed using [`tokio::task::block_in_place`] to avoid starving other work.
*/
pub fn blocking_flush<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    in_place(|| sync::blocking_flush(sender, timeout))
}

/**
Close a channel potentially running on a `tokio` thread and wait for its receiver to exit.
*/
pub fn blocking_close<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    in_place(|| sync::blocking_close(sender, timeout))
}

fn in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
