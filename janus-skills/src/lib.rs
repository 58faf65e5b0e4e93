mod loader;
pub mod manifest;
mod registry;
pub mod script_runner;

pub use janus_core::error::SkillError;
pub use loader::{CAPABILITY_GAP_KEY, ScriptHandler, ScriptLoader};
pub use registry::SkillRegistry;
pub use script_runner::{ScriptError, run_script};
