//! Event admission core of a DAG BFT validator: the checks an incoming event
//! passes before it is accepted, gas power accounting and ban classification.

pub mod ban;
pub mod basiccheck;
pub mod checkers;
pub mod config;
pub mod epochcheck;
pub mod gaspower;
pub mod gpo_backend;
pub mod heavycheck;
pub mod logging;
pub mod parentscheck;
pub mod rules;
pub mod state;
pub mod types;

pub use ban::{classify, is_ban, BanDecision, CheckError};
pub use checkers::Checkers;
pub use config::Config;
pub use gpo_backend::GasPowerOracleBackend;
pub use state::MemoryStore;
