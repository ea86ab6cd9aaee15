pub mod embedder;
pub mod embedding;
