//! The view of a binding the orchestrator works with.

use async_trait::async_trait;
use entcache_core::Record;
use entcache_protocol::ResourceError;

/// Data held by a binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    /// A single record.
    Record(Record),
    /// An ordered list of records.
    List(Vec<Record>),
}

impl ResourceData {
    /// Returns the record, if this is a single record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            ResourceData::Record(record) => Some(record),
            ResourceData::List(_) => None,
        }
    }

    /// Returns the records, if this is a list.
    pub fn as_list(&self) -> Option<&[Record]> {
        match self {
            ResourceData::Record(_) => None,
            ResourceData::List(records) => Some(records),
        }
    }
}

/// What a binding currently reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceState {
    /// The data to show.
    pub data: Option<ResourceData>,
    /// Whether a request is in progress that the caller should wait for.
    pub loading: bool,
    /// The error of the last attempt.
    pub error: Option<ResourceError>,
    /// True when `data` belongs to the binding's previous key and is shown
    /// while the current key loads.
    pub is_previous: bool,
}

impl ResourceState {
    /// Returns the record, if the data is a single record.
    pub fn record(&self) -> Option<&Record> {
        self.data.as_ref().and_then(ResourceData::as_record)
    }

    /// Returns the records, if the data is a list.
    pub fn list(&self) -> Option<&[Record]> {
        self.data.as_ref().and_then(ResourceData::as_list)
    }
}

/// A binding the orchestrator can observe and retry.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Returns the binding's current state.
    fn state(&self) -> ResourceState;

    /// Fetches the binding's data again, bypassing freshness.
    async fn refetch(&self);
}
