//! Responders
//!
//! The drafting and revision steps both ask a model for one structured
//! response. A [`Responder`] is that model seam; [`LlmResponder`] renders the
//! History into a chat request that forces a single function call
//! (`AnswerQuestion` for drafts, `ReviseAnswer` for revisions).

use crate::agents::schema::{ResponseSchema, StructuredResponse};
use crate::llm::provider::LLM;
use crate::models::{History, Message, ToolCall};
use crate::types::{AppResult, LLMMessage, LLMRequest, LLMToolCall};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce one assistant message whose invocation requests carry a
    /// structured response. Must not modify `history`.
    async fn respond(&self, history: &History) -> AppResult<Message>;
}

const DRAFT_INSTRUCTION: &str = "Provide a detailed ~250 word answer.";

const REVISE_INSTRUCTION: &str = r#"Revise your previous answer using the new information.
    - Use the previous critique to add important information to your answer.
        - You MUST include numerical citations in your revised answer so it can be verified.
        - Add a "References" section to the bottom of your answer (it does not count towards the word limit), in the form:
            - [1] https://example.com
            - [2] https://example.com
    - Use the previous critique to remove superfluous information from your answer and make SURE it is not more than 250 words."#;

pub struct LlmResponder {
    llm: Arc<LLM>,
    schema: ResponseSchema,
    instruction: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmResponder {
    pub fn new(llm: Arc<LLM>, schema: ResponseSchema, model: impl Into<String>) -> Self {
        let instruction = match schema {
            ResponseSchema::AnswerQuestion => DRAFT_INSTRUCTION,
            ResponseSchema::ReviseAnswer => REVISE_INSTRUCTION,
        };
        Self {
            llm,
            schema,
            instruction: instruction.to_string(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Responder for the drafting step
    pub fn drafter(llm: Arc<LLM>, model: impl Into<String>) -> Self {
        Self::new(llm, ResponseSchema::AnswerQuestion, model)
    }

    /// Responder for the revision step
    pub fn revisor(llm: Arc<LLM>, model: impl Into<String>) -> Self {
        Self::new(llm, ResponseSchema::ReviseAnswer, model)
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are an expert researcher.
Current time: {time}

1. {instruction}
2. Reflect and critique your answer. Be severe to maximize improvement.
3. Recommend search queries to research information and improve your answer."#,
            time = chrono::Utc::now().to_rfc3339(),
            instruction = self.instruction,
        )
    }

    fn build_request(&self, history: &History) -> LLMRequest {
        let mut messages: Vec<LLMMessage> = history.messages().iter().map(to_llm_message).collect();
        messages.push(LLMMessage::system(format!(
            "Answer the user's question above using the {} function.",
            self.schema
        )));

        LLMRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_instruction: Some(self.system_prompt()),
            tools: vec![self.schema.tool_definition()],
            tool_choice: Some(self.schema.name().to_string()),
        }
    }
}

#[async_trait]
impl Responder for LlmResponder {
    async fn respond(&self, history: &History) -> AppResult<Message> {
        let request = self.build_request(history);
        info!(
            provider = %self.llm.provider(),
            schema = %self.schema,
            history_len = history.len(),
            "Requesting structured response"
        );

        let response = self.llm.create_chat_completion(&request).await?;
        debug!(
            finish_reason = %response.finish_reason,
            total_tokens = response.usage.total_tokens,
            tool_calls = response.tool_calls.len(),
            "Structured response received"
        );

        let tool_calls = response
            .tool_calls
            .into_iter()
            .map(|call| -> AppResult<ToolCall> {
                // stored args are normalized: `references` is always present
                let parsed = StructuredResponse::from_arguments_str(&call.arguments)?;
                Ok(ToolCall::new(call.id, call.name, parsed.to_args()))
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Message::assistant(response.content, tool_calls))
    }
}

fn to_llm_message(message: &Message) -> LLMMessage {
    match message {
        Message::User { content } => LLMMessage::user(content.clone()),
        Message::Assistant { content, tool_calls } => LLMMessage::assistant_with_calls(
            content.clone(),
            tool_calls
                .iter()
                .map(|call| LLMToolCall {
                    id: call.id.clone(),
                    name: call.action.clone(),
                    arguments: call.args.to_string(),
                })
                .collect(),
        ),
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => LLMMessage::tool(tool_call_id.clone(), content.clone()),
    }
}
