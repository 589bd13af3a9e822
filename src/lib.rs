pub mod cli;
pub mod config;
pub mod gateway;
pub mod orchestration;
pub mod safe_json;
pub mod shared;
pub mod state_store;
pub mod tools;
