//! The finished video buffer.

use crate::codec::Container;
use crate::history::HistoryQuery;

/// A finalized video, ready to be written or downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub container: Container,
}

impl OutputArtifact {
    pub fn new(bytes: Vec<u8>, container: Container) -> Self {
        Self {
            bytes,
            mime_type: container.mime_type(),
            container,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File name derived from the query, e.g. `timelapse-political-year.webm`.
    pub fn suggested_file_name(&self, query: &HistoryQuery) -> String {
        let mut name = format!(
            "timelapse-{}-{}",
            query.kind.as_str(),
            query.interval.as_str()
        );
        if let Some(start) = query.start {
            name.push_str(&format!("-from{start}"));
        }
        format!("{name}.{}", self.container.extension())
    }
}
