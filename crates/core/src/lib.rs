pub mod ownership;
pub mod stats;
pub mod types;
