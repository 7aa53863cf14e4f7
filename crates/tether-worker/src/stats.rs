use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::{decode_params, encode_params, ErrorCode, RemoteError};
use tether_snapshot::{DocumentSnapshot, Snapshot};
use tether_types::{CancellationSignal, DocumentId};

use crate::service::{LanguageService, MethodDescriptor};

pub const SOLUTION_STATS: &str = "solution-stats";
pub const DOCUMENT_STATS: &str = "document-stats";
pub const FIND: &str = "find";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStats {
    pub lines: usize,
    pub words: usize,
    pub bytes: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            lines: text.lines().count(),
            words: text.split_whitespace().count(),
            bytes: text.len(),
        }
    }

    fn add(&mut self, other: &TextStats) {
        self.lines += other.lines;
        self.words += other.words;
        self.bytes += other.bytes;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionStats {
    pub projects: usize,
    pub documents: usize,
    #[serde(flatten)]
    pub totals: TextStats,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatsParams {
    pub document: DocumentId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub name: String,
    #[serde(flatten)]
    pub stats: TextStats,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindParams {
    pub pattern: String,
}

/// One occurrence; `line` and `column` are 1-based, `column` in chars.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMatch {
    pub document: DocumentId,
    pub name: String,
    pub line: usize,
    pub column: usize,
}

/// Built-in service computing plain text statistics over a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextStatsService;

impl TextStatsService {
    fn solution_stats(snapshot: &Snapshot) -> SolutionStats {
        let mut totals = TextStats::default();
        let mut documents = 0;
        for doc in snapshot.documents() {
            totals.add(&TextStats::of(doc.text()));
            documents += 1;
        }
        SolutionStats {
            projects: snapshot.projects().count(),
            documents,
            totals,
        }
    }

    fn find_in(doc: &DocumentSnapshot, pattern: &str, out: &mut Vec<FindMatch>) {
        for (line_no, line) in doc.text().lines().enumerate() {
            for (offset, _) in line.match_indices(pattern) {
                out.push(FindMatch {
                    document: doc.id(),
                    name: doc.name().to_string(),
                    line: line_no + 1,
                    column: line[..offset].chars().count() + 1,
                });
            }
        }
    }
}

fn invalid(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(ErrorCode::InvalidParams, e.to_string())
}

fn internal(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(ErrorCode::Internal, e.to_string())
}

#[async_trait]
impl LanguageService for TextStatsService {
    fn methods(&self) -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::read_only(SOLUTION_STATS).cacheable(),
            MethodDescriptor::read_only(DOCUMENT_STATS).cacheable(),
            MethodDescriptor::read_only(FIND),
        ]
    }

    async fn execute(
        &self,
        method: &str,
        snapshot: Arc<Snapshot>,
        params: Value,
        cancel: CancellationSignal,
    ) -> Result<Value, RemoteError> {
        match method {
            SOLUTION_STATS => encode_params(&Self::solution_stats(&snapshot)).map_err(internal),
            DOCUMENT_STATS => {
                let params: DocumentStatsParams = decode_params(params).map_err(invalid)?;
                let doc = snapshot
                    .document(params.document)
                    .ok_or_else(|| invalid(format!("unknown document {}", params.document)))?;
                encode_params(&DocumentStats {
                    name: doc.name().to_string(),
                    stats: TextStats::of(doc.text()),
                })
                .map_err(internal)
            }
            FIND => {
                let params: FindParams = decode_params(params).map_err(invalid)?;
                if params.pattern.is_empty() {
                    return Err(invalid("empty pattern"));
                }
                let mut matches = Vec::new();
                for doc in snapshot.documents() {
                    if cancel.is_cancelled() {
                        return Err(RemoteError::canceled());
                    }
                    Self::find_in(doc, &params.pattern, &mut matches);
                    tokio::task::yield_now().await;
                }
                encode_params(&matches).map_err(internal)
            }
            other => Err(RemoteError::new(
                ErrorCode::MethodNotFound,
                format!("unknown method {other}"),
            )),
        }
    }
}
