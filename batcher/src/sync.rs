/*!
Wait for a channel from a synchronous context.
*/

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{Channel, Sender};

#[derive(Clone)]
struct Trigger(Arc<(Mutex<bool>, Condvar)>);

impl Trigger {
    fn new() -> Self {
        Trigger(Arc::new((Mutex::new(false), Condvar::new())))
    }

    fn trigger(self) {
        *(self.0).0.lock().unwrap_or_else(PoisonError::into_inner) = true;
        (self.0).1.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let mut triggered = (self.0).0.lock().unwrap_or_else(PoisonError::into_inner);
        while !*triggered {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            triggered = (self.0)
                .1
                .wait_timeout(triggered, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }
}

/**
Wait for the items active at the point this call was made to be processed.

Returns `false` if the timeout was reached first.
*/
pub fn blocking_flush<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    let on_flush = Trigger::new();

    sender.on_next_flush({
        let on_flush = on_flush.clone();

        move || on_flush.trigger()
    });

    on_flush.wait_timeout(timeout)
}

/**
Close the channel and wait for the receiver to process its last batch and exit.

Returns `false` if the timeout was reached first. The receiver may still be running in this case.
*/
pub fn blocking_close<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    let on_stopped = Trigger::new();

    sender.on_stopped({
        let on_stopped = on_stopped.clone();

        move || on_stopped.trigger()
    });

    sender.close();

    on_stopped.wait_timeout(timeout)
}
