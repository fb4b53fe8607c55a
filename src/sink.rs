/*!
The [`Sink`] type.

A sink is the destination of log records. Sinks can be combined with [`Sink::and_to`], so the same records can be written to the console and shipped to a collector.
*/

use core::time::Duration;
use std::{sync::Arc, time::Instant};

use crate::record::Record;

/**
A destination for log records.
*/
pub trait Sink {
    /**
    Write a record.

    This method should not block on network IO; sinks that ship records remotely should buffer them and send in the background.
    */
    fn emit(&self, record: &Record);

    /**
    Block until records written so far have been fully processed, or the timeout expires.

    Returns `true` if everything was flushed.
    */
    fn blocking_flush(&self, timeout: Duration) -> bool;

    fn and_to<U>(self, other: U) -> And<Self, U>
    where
        Self: Sized,
    {
        And {
            left: self,
            right: other,
        }
    }
}

impl<'a, T: Sink + ?Sized> Sink for &'a T {
    fn emit(&self, record: &Record) {
        (**self).emit(record)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }
}

impl<T: Sink + ?Sized> Sink for Box<T> {
    fn emit(&self, record: &Record) {
        (**self).emit(record)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }
}

impl<T: Sink + ?Sized> Sink for Arc<T> {
    fn emit(&self, record: &Record) {
        (**self).emit(record)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }
}

impl<T: Sink> Sink for Option<T> {
    fn emit(&self, record: &Record) {
        if let Some(sink) = self {
            sink.emit(record)
        }
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        match self {
            Some(sink) => sink.blocking_flush(timeout),
            None => true,
        }
    }
}

/**
A sink that discards everything.
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

impl Sink for Empty {
    fn emit(&self, _: &Record) {}

    fn blocking_flush(&self, _: Duration) -> bool {
        true
    }
}

/**
A sink that calls a function for each record.
*/
pub struct FromFn<F>(F);

impl<F: Fn(&Record)> Sink for FromFn<F> {
    fn emit(&self, record: &Record) {
        (self.0)(record)
    }

    fn blocking_flush(&self, _: Duration) -> bool {
        true
    }
}

pub fn from_fn<F: Fn(&Record)>(f: F) -> FromFn<F> {
    FromFn(f)
}

/**
Two sinks that both receive every record.
*/
pub struct And<T, U> {
    left: T,
    right: U,
}

impl<T, U> And<T, U> {
    pub fn left(&self) -> &T {
        &self.left
    }

    pub fn right(&self) -> &U {
        &self.right
    }
}

impl<T: Sink, U: Sink> Sink for And<T, U> {
    fn emit(&self, record: &Record) {
        self.left.emit(record);
        self.right.emit(record);
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        // The right side gets whatever time the left side didn't use
        let start = Instant::now();

        let left = self.left.blocking_flush(timeout);
        let right = self
            .right
            .blocking_flush(timeout.saturating_sub(start.elapsed()));

        left && right
    }
}
