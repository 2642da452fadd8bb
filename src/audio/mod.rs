//! Audio ingest

pub mod decoder;

pub use decoder::decode_stereo;
