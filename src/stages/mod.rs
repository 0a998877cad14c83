//! Individual pipeline stages. `pipeline.rs` wires these into the ordered
//! `QueueManager` a run actually drives; each module here only implements
//! `StageLogic` for one link in that chain.

pub mod filter_stage;
pub mod plugin_stage;
pub mod printer;
pub mod recursive;
pub mod redirect;
pub mod routing;
pub mod seed;
pub mod transport;
