use homebot_core::{Error, Result};
use homebot_home::{Discovery, EntityRecord, ServiceDescriptor};
use homebot_providers::RetryingProvider;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{self, Intent};
use crate::executor::{Executor, Outcome};
use crate::intent::IntentClass;
use crate::prompt::PromptBuilder;

/// One failed pass through parse, validate and execute.
#[derive(Debug, Clone)]
pub struct CommandAttempt {
    pub attempt: u32,
    pub raw_output: String,
    pub intent: Option<Intent>,
    /// Error text shown to the model on the next attempt. Platform
    /// rejections keep the raw response body.
    pub error: String,
}

/// Text fed back to the model for a failed attempt.
pub fn feedback_text(err: &Error) -> String {
    match err {
        Error::PlatformRejected { status, body } => format!("HTTP {}: {}", status, body),
        other => other.to_string(),
    }
}

/// Everything the loop needs to (re)build a prompt.
pub struct CorrectionRequest<'a> {
    pub message: &'a str,
    pub hint: IntentClass,
    pub matched: &'a [&'a EntityRecord],
    pub known: &'a [EntityRecord],
    pub services: &'a [ServiceDescriptor],
}

#[derive(Debug)]
enum LoopState {
    Attempt(u32),
    Success(Outcome),
    GiveUp(Error),
}

/// Final result of a loop run.
#[derive(Debug)]
pub struct Resolution {
    /// Attempts made, first one included.
    pub attempts: u32,
    pub result: Result<Outcome>,
}

/// Re-prompts the model after correctable failures, up to
/// `max_corrections` times after the first attempt. Attempts never overlap.
pub struct CorrectionLoop<'a> {
    pub provider: &'a RetryingProvider,
    pub builder: &'a PromptBuilder,
    pub discovery: &'a Discovery,
    pub executor: &'a Executor,
    pub max_corrections: u32,
}

impl<'a> CorrectionLoop<'a> {
    pub async fn run(&self, request: &CorrectionRequest<'_>, cancel: &CancellationToken) -> Resolution {
        let max_attempts = self.max_corrections + 1;
        let mut history: Vec<CommandAttempt> = Vec::new();
        let mut first_error: Option<Error> = None;
        let mut state = LoopState::Attempt(1);
        let mut attempts = 0;

        loop {
            state = match state {
                LoopState::Attempt(n) => {
                    if cancel.is_cancelled() {
                        LoopState::GiveUp(Error::Cancelled)
                    } else {
                        attempts = n;
                        match self.attempt(n, request, &history, cancel).await {
                            Ok(outcome) => LoopState::Success(outcome),
                            Err((err, raw_output, intent)) if err.is_correctable() => {
                                warn!(attempt = n, max_attempts, error = %err, "Command attempt failed");
                                history.push(CommandAttempt {
                                    attempt: n,
                                    raw_output,
                                    intent,
                                    error: feedback_text(&err),
                                });
                                let first = first_error.get_or_insert(err);
                                if n < max_attempts {
                                    LoopState::Attempt(n + 1)
                                } else {
                                    LoopState::GiveUp(clone_error(first))
                                }
                            }
                            Err((err, _, _)) => LoopState::GiveUp(err),
                        }
                    }
                }
                LoopState::Success(outcome) => {
                    if attempts > 1 {
                        info!(attempts, "Command succeeded after correction");
                    }
                    return Resolution {
                        attempts,
                        result: Ok(outcome),
                    };
                }
                LoopState::GiveUp(err) => {
                    return Resolution {
                        attempts,
                        result: Err(err),
                    };
                }
            };
        }
    }

    async fn attempt(
        &self,
        n: u32,
        request: &CorrectionRequest<'_>,
        history: &[CommandAttempt],
        cancel: &CancellationToken,
    ) -> std::result::Result<Outcome, (Error, String, Option<Intent>)> {
        let prompt = self.builder.build(
            request.message,
            request.hint,
            request.matched,
            request.known,
            request.services,
            history,
        );
        let raw = self
            .provider
            .complete_cancellable(&prompt, cancel)
            .await
            .map_err(|e| (e, String::new(), None))?;
        debug!(attempt = n, output = %raw, "Model output");

        let intent = command::parse(&raw).map_err(|e| (e, raw.clone(), None))?;
        let intent = command::validate(intent.clone(), self.discovery)
            .await
            .map_err(|e| (e, raw.clone(), Some(intent.clone())))?;

        if cancel.is_cancelled() {
            return Err((Error::Cancelled, raw, Some(intent)));
        }
        self.executor
            .execute(&intent)
            .await
            .map_err(|e| (e, raw, Some(intent)))
    }
}

/// `Error` holds an io::Error and can't derive Clone; correctable variants
/// are plain data.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::MalformedCommand(m) => Error::MalformedCommand(m.clone()),
        Error::UnknownEntity(m) => Error::UnknownEntity(m.clone()),
        Error::UnsupportedService {
            domain,
            service,
            reason,
        } => Error::UnsupportedService {
            domain: domain.clone(),
            service: service.clone(),
            reason: reason.clone(),
        },
        Error::PlatformRejected { status, body } => Error::PlatformRejected {
            status: *status,
            body: body.clone(),
        },
        other => Error::Other(other.to_string()),
    }
}
