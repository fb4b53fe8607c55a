/*!
The OTLP wire format.

Types here mirror the `opentelemetry.proto` messages closely enough to be streamed as either protobuf or JSON.
*/

use std::io::Cursor;

use bytes::Buf;
use sval_protobuf::buf::{ProtoBuf, ProtoBufCursor};

use crate::Error;

pub mod logs;
pub mod metrics;

mod any_value;
mod instrumentation_scope;
mod resource;

#[cfg(test)]
pub(crate) mod generated;

pub use self::{any_value::*, instrumentation_scope::*, resource::*};

/**
The format of a request body.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Proto,
    Json,
}

impl Encoding {
    pub fn of(payload: &EncodedPayload) -> Self {
        match payload {
            EncodedPayload::Proto(_) => Encoding::Proto,
            EncodedPayload::Json(_) => Encoding::Json,
        }
    }

    pub fn encode(self, value: impl sval::Value) -> Result<EncodedPayload, Error> {
        match self {
            Encoding::Proto => Ok(EncodedPayload::Proto(sval_protobuf::stream_to_protobuf(
                value,
            ))),
            Encoding::Json => sval_json::stream_to_string(value)
                .map(|json| EncodedPayload::Json(json.into_bytes().into_boxed_slice()))
                .map_err(|e| Error::new("failed to encode a JSON payload", e)),
        }
    }
}

pub(crate) enum EncodedPayload {
    Proto(ProtoBuf),
    Json(Box<[u8]>),
}

impl EncodedPayload {
    pub fn len(&self) -> usize {
        match self {
            EncodedPayload::Proto(buf) => buf.len(),
            EncodedPayload::Json(buf) => buf.len(),
        }
    }

    pub fn into_cursor(self) -> PreEncodedCursor {
        match self {
            EncodedPayload::Proto(buf) => PreEncodedCursor::Proto(buf.into_cursor()),
            EncodedPayload::Json(buf) => PreEncodedCursor::Json(Cursor::new(buf)),
        }
    }

    #[cfg(test)]
    pub fn to_vec(self) -> Vec<u8> {
        let mut cursor = self.into_cursor();
        let mut buf = Vec::with_capacity(cursor.remaining());

        while cursor.has_remaining() {
            let chunk = cursor.chunk();
            buf.extend_from_slice(chunk);

            let read = chunk.len();
            cursor.advance(read);
        }

        buf
    }
}

pub(crate) enum PreEncodedCursor {
    Proto(ProtoBufCursor),
    Json(Cursor<Box<[u8]>>),
}

impl Buf for PreEncodedCursor {
    fn remaining(&self) -> usize {
        match self {
            PreEncodedCursor::Proto(cursor) => cursor.remaining(),
            PreEncodedCursor::Json(cursor) => cursor.remaining(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            PreEncodedCursor::Proto(cursor) => cursor.chunk(),
            PreEncodedCursor::Json(cursor) => cursor.chunk(),
        }
    }

    fn advance(&mut self, cnt: usize) {
        match self {
            PreEncodedCursor::Proto(cursor) => cursor.advance(cnt),
            PreEncodedCursor::Json(cursor) => cursor.advance(cnt),
        }
    }
}
