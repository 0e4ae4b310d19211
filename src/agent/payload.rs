//! Data held by a device for `PUBLISH` commands

use bytes::Bytes;
use std::collections::HashMap;

/// Payload held for one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Sent as a single record
    Scalar(Bytes),
    /// Sent as one record per element, in order
    Sequence(Vec<Bytes>),
}

impl Payload {
    pub fn scalar(value: impl Into<Bytes>) -> Self {
        Payload::Scalar(value.into())
    }

    pub fn sequence<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        Payload::Sequence(values.into_iter().map(Into::into).collect())
    }

    /// Records this payload expands to, in send order
    pub fn records(&self) -> &[Bytes] {
        match self {
            Payload::Scalar(value) => std::slice::from_ref(value),
            Payload::Sequence(values) => values,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records().len()
    }

    /// Total size in bytes across all records
    pub fn total_bytes(&self) -> usize {
        self.records().iter().map(Bytes::len).sum()
    }
}

/// Topic name to payload
pub type DataStore = HashMap<String, Payload>;
