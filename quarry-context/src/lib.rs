//! Text chunking utilities for the quarry retrieval system.

pub mod text;

pub use text::{Chunk, ChunkId, Chunker, ChunkerConfig};
