pub mod capture;
pub mod config;
pub mod detection;
pub mod embedding;
pub mod events;
pub mod identity;
pub mod pipeline;
pub mod registration;
pub mod shared;
pub mod tracking;

#[cfg(test)]
mod test_support;
