pub mod command;
pub mod correction;
pub mod executor;
pub mod intent;
pub mod pipeline;
pub mod prompt;
pub mod reply;

#[cfg(test)]
mod testutil;

pub use command::Intent;
pub use correction::{CommandAttempt, CorrectionLoop, CorrectionRequest, Resolution};
pub use executor::{Executor, Outcome};
pub use intent::{IntentClass, IntentClassifier};
pub use pipeline::{Answer, HomeSource, Pipeline};
pub use prompt::PromptBuilder;
