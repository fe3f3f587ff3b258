//! Domain logic for span observability
//!
//! - `idgen` - time-ordered 64-bit ids backed by a shared counter store
//! - `span` - span and annotation model, ingest validation
//! - `filter` - typed predicate language and in-memory matcher
//! - `transform` - span selection, tag redaction and re-parenting
//! - `platform` - per-platform query scope
//! - `processor` - post-query enrichment chain
//! - `ingest` - validation and queue producer
//! - `persist` - queue consumer writing to the column store
//! - `annotate` - annotation create, correct and delete
//! - `query` - span, trace and annotation reads
//! - `tenant` - platform to tenant to table routing

pub mod annotate;
pub mod error;
pub mod filter;
pub mod idgen;
pub mod ingest;
pub mod persist;
pub mod platform;
pub mod processor;
pub mod query;
pub mod span;
pub mod tenant;
pub mod transform;

pub use annotate::AnnotationService;
pub use error::{TraceError, TraceResult};
pub use idgen::IdGenerator;
pub use ingest::{IngestService, TraceData, TraceProducer, UntypedSpan};
pub use persist::SpanPersistConsumer;
pub use query::TraceQueryService;
