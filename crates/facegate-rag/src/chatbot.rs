//! One chatbot session over the registration records.

use crate::documents::registration_documents;
use crate::embedder::TextEmbedder;
use crate::generator::{AnswerGenerator, GenerateError};
use crate::index::{IndexError, RetrievalIndex};
use crate::intent::{general_prompt, registration_prompt, route, Intent};
use facegate_store::RegisteredUser;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("retrieval: {0}")]
    Index(#[from] IndexError),
    #[error("generation: {0}")]
    Generate(#[from] GenerateError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub intent: Intent,
    /// Retrieved documents, closest first. Empty on the general path.
    pub context: Vec<String>,
    pub prompt: String,
    pub text: String,
}

pub struct Chatbot {
    index: RetrievalIndex,
    embedder: Box<dyn TextEmbedder>,
    generator: Box<dyn AnswerGenerator>,
    top_k: usize,
}

impl Chatbot {
    /// Build the session index from the registered users.
    pub fn new(
        users: &[RegisteredUser],
        mut embedder: Box<dyn TextEmbedder>,
        generator: Box<dyn AnswerGenerator>,
        top_k: usize,
    ) -> Result<Self, ChatError> {
        let index = RetrievalIndex::build(registration_documents(users), embedder.as_mut())?;
        Ok(Self { index, embedder, generator, top_k })
    }

    pub fn documents(&self) -> &[String] {
        self.index.documents()
    }

    #[instrument(skip(self), fields(top_k = self.top_k))]
    pub async fn answer(&mut self, question: &str) -> Result<Reply, ChatError> {
        // Blank input is dropped; anything else goes to the prompt verbatim.
        if question.trim().is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let intent = route(question);
        let (context, prompt) = match intent {
            Intent::Registration => {
                let docs = self
                    .index
                    .retrieve(self.embedder.as_mut(), question, self.top_k)?;
                let prompt = registration_prompt(&docs, question);
                (docs.into_iter().map(str::to_string).collect(), prompt)
            }
            Intent::General => (Vec::new(), general_prompt(question)),
        };
        tracing::debug!(?intent, context = context.len(), "prompt built");

        let text = self.generator.generate(&prompt).await?;
        Ok(Reply { intent, context, prompt, text })
    }
}
