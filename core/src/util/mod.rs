mod id_gen;
mod text;

pub use id_gen::generate_execution_id;
pub use text::{truncate_chars, Utf8ChunkDecoder, TRUNCATION_MARKER};
