pub mod auth;
pub mod report;
pub mod tx;
pub mod user;
pub mod utils;

#[cfg(test)]
pub mod memory;
