use std::sync::atomic::{AtomicUsize, Ordering};

macro_rules! metrics {
    (
        $pub_container:ident {
            $(
                $(#[$meta:meta])*
                $metric:ident: $ty:ident,
            )*
        }
    ) => {
        #[derive(Default)]
        pub(crate) struct InternalMetrics {
            $(
                pub(crate) $metric: $ty,
            )*
        }

        /**
        A point-in-time sample of a channel's own activity.
        */
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $pub_container {
            $(
                $(#[$meta])*
                pub $metric: usize,
            )*
            /**
            The number of items waiting in the channel when the sample was taken.
            */
            pub queue_length: usize,
        }

        impl InternalMetrics {
            pub(crate) fn sample(&self, queue_length: usize) -> $pub_container {
                let InternalMetrics { $($metric),* } = self;

                $pub_container {
                    $(
                        $metric: $metric.sample(),
                    )*
                    queue_length,
                }
            }
        }

        impl $pub_container {
            /**
            Iterate over the sampled values as name-value pairs.
            */
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> {
                [
                    $(
                        (stringify!($metric), self.$metric),
                    )*
                    ("queue_length", self.queue_length),
                ]
                .into_iter()
            }
        }
    };
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, by: usize) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

metrics!(ChannelMetrics {
    /**
    An item was dropped because the channel was at capacity.
    */
    queue_overflow: Counter,
    /**
    An item was dropped because the channel was closed or abandoned.
    */
    queue_discarded: Counter,
    /**
    A batch was processed successfully.
    */
    queue_batch_processed: Counter,
    /**
    A batch failed to process.
    */
    queue_batch_failed: Counter,
    /**
    A batch panicked while processing.
    */
    queue_batch_panicked: Counter,
    /**
    A failed batch was retried.
    */
    queue_batch_retry: Counter,
});
