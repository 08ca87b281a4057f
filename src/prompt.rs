use serde::{Deserialize, Serialize};
use thiserror::Error;
use tinytemplate::TinyTemplate;

/// Prompt for questions that match no known intent.
pub const FALLBACK_TEMPLATE: &str = "<start_of_turn>user Respond in not more than 10 words only. {question}<end_of_turn>\n";

/// Prompt asking for a short remark on a decoded reading.
pub const COMMENT_TEMPLATE: &str = "<start_of_turn>user As an automotive mechanic, provide only a 5-word comment on {reading}, nothing else. Do not include 'Sure,' 'Here is,' or any additional text. Respond with exactly 5 words<end_of_turn>\n";

#[derive(Debug, Error)]
#[error("failed to render prompt: {0}")]
pub struct PromptError(#[from] tinytemplate::error::Error);

/// Renders a string template using `TinyTemplate`.
///
/// Placeholders use the `{name}` syntax and values are inserted verbatim.
///
/// # Examples
///
/// ```
/// use obd_llm::prompt::render_template;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Ctx { reading: &'static str }
///
/// let out = render_template("Say <{reading}>", &Ctx { reading: "a & b" }).unwrap();
/// assert_eq!(out, "Say <a & b>");
/// ```
pub fn render_template<T: Serialize>(template: &str, ctx: &T) -> Result<String, PromptError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("tpl", template)?;
    Ok(tt.render("tpl", ctx)?)
}

/// Configurable prompt templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub fallback: String,
    pub comment: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            fallback: FALLBACK_TEMPLATE.into(),
            comment: COMMENT_TEMPLATE.into(),
        }
    }
}

#[derive(Serialize)]
struct Question<'a> {
    question: &'a str,
}

#[derive(Serialize)]
struct Reading<'a> {
    reading: &'a str,
}

impl Prompts {
    pub fn fallback(&self, question: &str) -> Result<String, PromptError> {
        render_template(&self.fallback, &Question { question })
    }

    pub fn comment(&self, reading: &str) -> Result<String, PromptError> {
        render_template(&self.comment, &Reading { reading })
    }
}
