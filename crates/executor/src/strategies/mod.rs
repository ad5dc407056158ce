//! Concrete execution strategies, one per opportunity `type`.
//!
//! Each module validates the shape its detector family produces, then
//! either short-circuits to the simulator or drives the RPC boundary via
//! the shared tail in [`crate::strategy::execute_via_rpc`].

pub mod backrun;
pub mod cross_chain;
pub mod cross_dex;
pub mod flash_loan;
pub mod multi_leg;
pub mod solana;
pub mod statistical;
pub mod triangular;
