pub mod audit;
pub mod config;
pub mod error;
pub mod intent;
pub mod memory;
pub mod oracle;
pub mod perception;
pub mod skill;
pub mod task;
