use serde::{Deserialize, Serialize};

/// One incremental piece of a streamed model reply.
///
/// `index` increases by one per chunk within a turn. The terminal chunk has
/// `end_of_stream` set and an empty delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub index: u64,
    pub delta: String,
    pub end_of_stream: bool,
}

impl StreamChunk {
    pub fn delta(index: u64, delta: impl Into<String>) -> Self {
        Self {
            index,
            delta: delta.into(),
            end_of_stream: false,
        }
    }

    pub fn end(index: u64) -> Self {
        Self {
            index,
            delta: String::new(),
            end_of_stream: true,
        }
    }
}
