#![deny(unsafe_code)]

pub mod config;
pub mod net;
pub mod output;
pub mod paillier;
pub mod party;
pub mod protocols;

#[cfg(test)]
mod testing;

pub use party::run;
