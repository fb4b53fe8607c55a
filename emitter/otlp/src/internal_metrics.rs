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
        A point-in-time sample of an OTLP transport's own activity.

        These are metrics about the transport itself, not the metrics it exports.
        */
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        #[non_exhaustive]
        pub struct $pub_container {
            $(
                $(#[$meta])*
                pub $metric: usize,
            )*
        }

        impl InternalMetrics {
            pub(crate) fn sample(&self) -> $pub_container {
                let InternalMetrics { $($metric),* } = self;

                $pub_container {
                    $(
                        $metric: $metric.sample(),
                    )*
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
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

metrics!(OtlpMetrics {
    /**
    A log record was discarded because the sink was closed.
    */
    record_after_close: Counter,
    /**
    A connection to a remote OTLP receiver was established successfully.
    */
    transport_conn_established: Counter,
    /**
    A connection to a remote OTLP receiver could not be established.
    */
    transport_conn_failed: Counter,
    /**
    A TLS handshake with a remote OTLP receiver was made successfully.
    */
    transport_conn_tls_handshake: Counter,
    /**
    A TLS handshake with a remote OTLP receiver could not be made.
    */
    transport_conn_tls_failed: Counter,
    /**
    A request was sent successfully.
    */
    transport_request_sent: Counter,
    /**
    A request could not be sent.
    */
    transport_request_failed: Counter,
    /**
    The body of a request was compressed using gzip.
    */
    transport_request_compress_gzip: Counter,
    /**
    A HTTP export request was sent and responded with a successful status code.
    */
    http_batch_sent: Counter,
    /**
    A HTTP export request was sent but responded with a failed status code.
    */
    http_batch_failed: Counter,
    /**
    A gRPC export request was sent and responded with a successful status code.
    */
    grpc_batch_sent: Counter,
    /**
    A gRPC export request was sent but responded with a failed status code.
    */
    grpc_batch_failed: Counter,
});
