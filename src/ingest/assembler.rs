//! ChunkAssembler - reassembly of streamed reports
//!
//! A large report arrives as an ordered sequence of [`ReportChunk`]s. Each
//! chunk carries a slice of the service list, and one service's payload can
//! itself be split across chunks. Payload fragments for the same
//! `(name, type)` are joined in arrival order.
//!
//! Report metadata is pinned from the first chunk that names a reporter;
//! later chunks never overwrite it.

use std::collections::HashMap;
use std::fmt::Display;

use futures::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use super::IngestError;
use crate::{Report, ReportChunk, ServiceObservation};

/// Service type whose payload is a JSON array streamed in fragments.
pub const INCREMENTAL_SERVICE_TYPE: &str = "sync";

/// How fragments of one service payload are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Raw fragments of one JSON document; only valid once every fragment
    /// has been appended, so nothing is parsed per chunk.
    IncrementalJson,
    /// No structural assumption about the payload.
    Opaque,
}

impl MergeStrategy {
    pub fn for_service_type(service_type: &str) -> Self {
        if service_type == INCREMENTAL_SERVICE_TYPE {
            MergeStrategy::IncrementalJson
        } else {
            MergeStrategy::Opaque
        }
    }

    pub fn merge(self, accumulated: &mut Vec<u8>, fragment: &[u8]) {
        // TODO: splice array elements for IncrementalJson once reporters stop
        // splitting mid-element; both strategies append for now.
        match self {
            MergeStrategy::IncrementalJson => accumulated.extend_from_slice(fragment),
            MergeStrategy::Opaque => accumulated.extend_from_slice(fragment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    name: String,
    service_type: String,
}

#[derive(Debug, Clone)]
struct Metadata {
    reporter_id: String,
    timestamp: i64,
    partition: String,
    source_address: String,
    agent_id: String,
}

#[derive(Debug)]
struct Accumulator {
    /// Non-payload fields, from the first occurrence of the service
    service: ServiceObservation,
    strategy: MergeStrategy,
    fragments: usize,
}

#[derive(Debug)]
pub struct ChunkAssembler {
    max_chunks: usize,
    chunks: usize,
    metadata: Option<Metadata>,
    order: Vec<ServiceKey>,
    services: HashMap<ServiceKey, Accumulator>,
}

impl ChunkAssembler {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            max_chunks,
            chunks: 0,
            metadata: None,
            order: Vec::new(),
            services: HashMap::new(),
        }
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Merge one chunk. Returns `true` if the chunk is marked final.
    pub fn push(&mut self, chunk: ReportChunk) -> Result<bool, IngestError> {
        self.chunks += 1;
        if self.chunks > self.max_chunks {
            return Err(IngestError::TooManyChunks(self.max_chunks));
        }

        if chunk.total_chunks > 0 && chunk.chunk_index >= chunk.total_chunks {
            return Err(IngestError::MalformedChunk(format!(
                "chunk index {} out of range for {} chunks",
                chunk.chunk_index, chunk.total_chunks
            )));
        }

        trace!(
            "chunk {}/{} with {} services",
            chunk.chunk_index + 1,
            chunk.total_chunks,
            chunk.services.len()
        );

        match &self.metadata {
            None if !chunk.reporter_id.is_empty() => {
                self.metadata = Some(Metadata {
                    reporter_id: chunk.reporter_id.clone(),
                    timestamp: chunk.timestamp,
                    partition: chunk.partition.clone(),
                    source_address: chunk.source_address.clone(),
                    agent_id: chunk.agent_id.clone(),
                });
            }
            Some(pinned) if !chunk.reporter_id.is_empty() && chunk.reporter_id != pinned.reporter_id => {
                warn!(
                    "chunk {} claims reporter '{}' but stream belongs to '{}'",
                    chunk.chunk_index, chunk.reporter_id, pinned.reporter_id
                );
            }
            _ => {}
        }

        for service in chunk.services {
            let key = ServiceKey {
                name: service.name.clone(),
                service_type: service.service_type.clone(),
            };

            match self.services.get_mut(&key) {
                Some(accumulator) => {
                    accumulator
                        .strategy
                        .merge(&mut accumulator.service.message, &service.message);
                    accumulator.fragments += 1;
                }
                None => {
                    let strategy = MergeStrategy::for_service_type(&service.service_type);
                    self.order.push(key.clone());
                    self.services.insert(
                        key,
                        Accumulator {
                            service,
                            strategy,
                            fragments: 1,
                        },
                    );
                }
            }
        }

        Ok(chunk.is_final)
    }

    /// Build the complete report, in order of first appearance.
    pub fn finish(mut self) -> Result<Report, IngestError> {
        let metadata = self.metadata.take().ok_or(IngestError::EmptyReporterId)?;

        let services: Vec<ServiceObservation> = self
            .order
            .iter()
            .filter_map(|key| self.services.remove(key))
            .map(|accumulator| {
                if accumulator.fragments > 1 {
                    trace!(
                        "{}: joined {} fragments ({} bytes)",
                        accumulator.service.name,
                        accumulator.fragments,
                        accumulator.service.message.len()
                    );
                }
                accumulator.service
            })
            .collect();

        debug!(
            "assembled report for {} from {} chunks ({} services)",
            metadata.reporter_id,
            self.chunks,
            services.len()
        );

        Ok(Report {
            reporter_id: metadata.reporter_id,
            timestamp: metadata.timestamp,
            partition: metadata.partition,
            source_address: metadata.source_address,
            agent_id: metadata.agent_id,
            services,
        })
    }
}

/// Read chunks until one is marked final or the stream ends, then build the
/// report. A transport error aborts the whole call.
pub async fn assemble<S, E>(chunks: S, max_chunks: usize) -> Result<Report, IngestError>
where
    S: Stream<Item = Result<ReportChunk, E>>,
    E: Display,
{
    let mut assembler = ChunkAssembler::new(max_chunks);
    futures::pin_mut!(chunks);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| IngestError::Transport(e.to_string()))?;
        if assembler.push(chunk)? {
            trace!("final chunk received");
            break;
        }
    }

    assembler.finish()
}
