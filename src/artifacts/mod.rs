//! Output artifacts: decoding from the job result and persisting to a sink.
pub mod decode;
pub mod store;

pub use decode::{decode_artifacts, Artifact, ArtifactBatch};
pub use store::{ArtifactStore, BlobSink, FsSink, PersistedArtifact};
