pub mod factory;
pub mod fs;
pub mod runner;
