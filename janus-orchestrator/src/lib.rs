mod active;
pub mod auditor;
pub mod bridge;
pub mod builtins;
mod completion;
mod orchestrator;
pub mod resolver;
pub mod transcript;

pub use active::ActiveTasks;
pub use auditor::{CompositeAuditor, RuleBasedAuditor};
pub use bridge::FileOracleBridge;
pub use completion::{CompletionHub, Notification};
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use resolver::{IntentResolver, KeywordResolver};
pub use transcript::{MarkdownTranscript, TranscriptWriter};
