use std::sync::atomic::{AtomicUsize, Ordering};

use tally_batcher::ChannelMetrics;

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
        A point-in-time sample of a meter provider's own activity.
        */
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $pub_container {
            $(
                $(#[$meta])*
                pub $metric: usize,
            )*
            /**
            The activity of the channel between recorders and the export worker.
            */
            pub channel: ChannelMetrics,
        }

        impl InternalMetrics {
            pub(crate) fn sample(&self, channel: ChannelMetrics) -> $pub_container {
                let InternalMetrics { $($metric),* } = self;

                $pub_container {
                    $(
                        $metric: $metric.sample(),
                    )*
                    channel,
                }
            }
        }

        impl $pub_container {
            /**
            Iterate over the sampled values as name-value pairs, including those of the channel.
            */
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> {
                [
                    $(
                        (stringify!($metric), self.$metric),
                    )*
                ]
                .into_iter()
                .chain(self.channel.iter())
            }
        }
    };
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

metrics!(PipelineMetrics {
    /**
    A histogram value was discarded because it wasn't finite, or a new series was discarded because the cumulative state was at its cardinality limit.
    */
    measurement_rejected: Counter,
    /**
    A measurement was discarded because the provider was shutting down or stopped.
    */
    measurement_after_shutdown: Counter,
    /**
    A batch was exported successfully.
    */
    export_succeeded: Counter,
    /**
    An attempt to export a batch failed.
    */
    export_failed: Counter,
    /**
    An in-flight export was cancelled by the shutdown deadline.
    */
    export_cancelled: Counter,
});
