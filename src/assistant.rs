use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::{MatchError, SessionError};
use crate::matcher::{MatchOutcome, SemanticIntentMatcher};
use crate::obd::{self, DecodeError, Reading};
use crate::prompt::{PromptError, Prompts};
use crate::session::{GenerationStream, InferenceSession};

/// Readings of this many words or fewer are reported without a comment.
const MIN_COMMENT_WORDS: usize = 3;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Answer to a driver's question.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The question maps to a diagnostic request for the adapter.
    Request {
        code: String,
        score: f32,
        /// Line to send to the adapter.
        command: String,
    },
    /// Free-text answer from the model.
    Answer { text: String },
}

/// Streaming counterpart of [`Reply`].
pub enum StreamingReply {
    Request {
        code: String,
        score: f32,
        command: String,
    },
    Answer(GenerationStream),
}

/// A decoded reading with the model's remark on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Commentary {
    pub reading: Reading,
    pub comment: Option<String>,
}

/// Routes questions to a PID request or to the model.
pub struct DiagnosticAssistant {
    matcher: Arc<SemanticIntentMatcher>,
    session: Arc<InferenceSession>,
    prompts: Prompts,
}

impl DiagnosticAssistant {
    pub fn new(matcher: Arc<SemanticIntentMatcher>, session: Arc<InferenceSession>) -> Self {
        Self::with_prompts(matcher, session, Prompts::default())
    }

    pub fn with_prompts(
        matcher: Arc<SemanticIntentMatcher>,
        session: Arc<InferenceSession>,
        prompts: Prompts,
    ) -> Self {
        Self {
            matcher,
            session,
            prompts,
        }
    }

    /// Classify `question`, falling back to a short model answer when no
    /// intent matches.
    pub async fn ask(&self, question: &str) -> Result<Reply, AssistantError> {
        match self.matcher.classify(question).await? {
            MatchOutcome::Matched { code, score } => {
                info!(%code, score, "question matched intent");
                Ok(Reply::Request {
                    command: obd::pid_request(&code),
                    code,
                    score,
                })
            }
            MatchOutcome::NoMatch { reason } => {
                debug!(%reason, "falling back to model");
                let prompt = self.prompts.fallback(question)?;
                let text = self.session.generate_sync(&prompt).await?;
                Ok(Reply::Answer {
                    text: text.trim().to_string(),
                })
            }
        }
    }

    /// Like [`ask`](Self::ask), streaming the fallback answer.
    pub async fn ask_streaming(&self, question: &str) -> Result<StreamingReply, AssistantError> {
        match self.matcher.classify(question).await? {
            MatchOutcome::Matched { code, score } => Ok(StreamingReply::Request {
                command: obd::pid_request(&code),
                code,
                score,
            }),
            MatchOutcome::NoMatch { reason } => {
                debug!(%reason, "streaming fallback answer");
                let prompt = self.prompts.fallback(question)?;
                Ok(StreamingReply::Answer(self.session.generate_streaming(&prompt)?))
            }
        }
    }

    /// Decode an adapter response and ask the model to remark on it.
    pub async fn comment(&self, raw_response: &str) -> Result<Commentary, AssistantError> {
        let reading = obd::decode_response(raw_response)?;
        let text = reading.to_string();
        if text.split_whitespace().count() <= MIN_COMMENT_WORDS {
            return Ok(Commentary {
                reading,
                comment: None,
            });
        }
        let prompt = self.prompts.comment(&text)?;
        let comment = self.session.generate_sync(&prompt).await?;
        Ok(Commentary {
            reading,
            comment: Some(comment.trim().to_string()),
        })
    }
}
