pub mod balances;
pub mod config;
pub mod error;
pub mod escalation;
pub mod fees;
pub mod funds;
pub mod gateway;
pub mod history;
pub mod notify;
pub mod request;
pub mod role;
pub mod service;
pub mod status;
pub mod transition;
pub mod utils;
