pub mod calldata_builder;
pub mod chain_reader;
pub mod config;
pub mod errors;
#[cfg(feature = "evm")]
pub mod evm;
pub mod models;
mod serde_primitives;
pub mod wallet;
