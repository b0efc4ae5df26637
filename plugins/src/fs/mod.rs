pub mod local;

pub use local::LocalFileSystem;
