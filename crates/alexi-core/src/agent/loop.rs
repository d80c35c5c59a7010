use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message, ToolDefinition};
use rig::message::{AssistantContent, Text, ToolCall, ToolResult, ToolResultContent, UserContent};
use rig::OneOrMany;
use tracing::{debug, info, warn};

use crate::agent::context::ContextBuilder;
use crate::agent::ReasoningEngine;
use crate::session;
use crate::tools::ToolRegistry;

const MAX_CONSECUTIVE_ERRORS: usize = 3;
const CONTINUE_PROMPT: &str =
    "If more tool calls are needed, make them. Otherwise, respond with the result.";

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn preview(s: &str, max: usize) -> String {
    if s.len() > max {
        let end = floor_char_boundary(s, max);
        format!("{}... ({} chars)", &s[..end], s.len())
    } else {
        s.to_string()
    }
}

/// Reasoning engine backed by a rig completion model.
///
/// Runs its own tool dispatch loop: the model is called with the tool
/// definitions, any tool calls are executed against the registry and fed
/// back, until the model answers with text.
#[allow(deprecated)]
pub struct AgentLoop {
    pub model: CompletionModelHandle<'static>,
    pub model_name: String,
    pub context: ContextBuilder,
    pub tools: ToolRegistry,
    pub max_iterations: usize,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[allow(deprecated)]
impl AgentLoop {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .list()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run the LLM <> tool loop until the model produces a text response or
    /// the iteration budget is spent. Returns (response_text, tools_used).
    async fn run_loop(
        &self,
        preamble: &str,
        mut chat_history: Vec<Message>,
        prompt: Message,
        tool_defs: &[ToolDefinition],
    ) -> Result<(String, Vec<String>)> {
        let mut tools_used = Vec::new();
        let mut current_prompt = prompt;
        let mut consecutive_errors: usize = 0;

        for iteration in 0..self.max_iterations {
            let mut all_messages = chat_history.clone();
            all_messages.push(current_prompt.clone());

            debug!(
                "LLM request [{}/{}] to {}: {} messages",
                iteration + 1,
                self.max_iterations,
                self.model_name,
                all_messages.len()
            );

            let request = CompletionRequest {
                preamble: Some(preamble.to_string()),
                chat_history: OneOrMany::many(all_messages)
                    .unwrap_or_else(|_| OneOrMany::one(current_prompt.clone())),
                documents: Vec::new(),
                tools: tool_defs.to_vec(),
                temperature: Some(self.temperature),
                max_tokens: Some(self.max_tokens),
                tool_choice: None,
                additional_params: None,
            };

            let llm_start = std::time::Instant::now();
            let response = self
                .model
                .completion(request)
                .await
                .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?;
            let llm_elapsed = llm_start.elapsed();

            let mut text_content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            for content in response.choice.iter() {
                match content {
                    AssistantContent::Text(t) => text_content.push_str(&t.text),
                    AssistantContent::ToolCall(tc) => tool_calls.push(tc.clone()),
                    _ => {}
                }
            }

            if tool_calls.is_empty() {
                if text_content.trim().is_empty() {
                    text_content = "I've completed processing but have no response to give.".into();
                }
                debug!(
                    "LLM response [{}/{}]: text ({} chars) in {:.1}s",
                    iteration + 1,
                    self.max_iterations,
                    text_content.len(),
                    llm_elapsed.as_secs_f64()
                );
                return Ok((text_content, tools_used));
            }

            debug!(
                "LLM response [{}/{}]: {} tool call(s) in {:.1}s",
                iteration + 1,
                self.max_iterations,
                tool_calls.len(),
                llm_elapsed.as_secs_f64()
            );

            chat_history.push(current_prompt);
            chat_history.push(Message::Assistant {
                id: None,
                content: response.choice.clone(),
            });

            let mut tool_results: Vec<UserContent> = Vec::new();
            let mut iteration_has_success = false;
            let mut last_error = String::new();
            for tc in &tool_calls {
                let tool_name = &tc.function.name;
                let tool_args = &tc.function.arguments;
                tools_used.push(tool_name.clone());

                info!(
                    "Tool call [{}/{}]: {tool_name}({})",
                    iteration + 1,
                    self.max_iterations,
                    preview(&tool_args.to_string(), 200)
                );

                let result = match self.tools.execute(tool_name, tool_args.clone()).await {
                    Ok(r) => {
                        if r.starts_with("Error") {
                            last_error.clone_from(&r);
                        } else {
                            iteration_has_success = true;
                        }
                        r
                    }
                    Err(e) => {
                        let err = format!("Error executing {tool_name}: {e}");
                        last_error.clone_from(&err);
                        err
                    }
                };
                debug!("Tool result [{tool_name}]: {}", preview(&result, 200));

                tool_results.push(UserContent::ToolResult(ToolResult {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text { text: result })),
                }));
            }

            // Circuit breaker for a model stuck on malformed tool calls.
            if iteration_has_success {
                consecutive_errors = 0;
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        "Circuit breaker: {consecutive_errors} consecutive iterations with all tool calls failing"
                    );
                    return Ok((
                        format!(
                            "I'm having trouble using a tool correctly and had to stop retrying. \
                             Last error: {last_error}. Could you try rephrasing your request?"
                        ),
                        tools_used,
                    ));
                }
            }

            tool_results.push(UserContent::Text(Text {
                text: CONTINUE_PROMPT.into(),
            }));
            current_prompt = Message::User {
                content: OneOrMany::many(tool_results).unwrap_or_else(|_| {
                    OneOrMany::one(UserContent::Text(Text {
                        text: CONTINUE_PROMPT.into(),
                    }))
                }),
            };
        }

        warn!(
            "Agent loop reached max iterations ({}) without final response",
            self.max_iterations
        );
        Ok((
            "I've been working on this but reached the maximum number of steps. \
             Please try a simpler request."
                .to_string(),
            tools_used,
        ))
    }
}

#[async_trait]
impl ReasoningEngine for AgentLoop {
    async fn invoke(&self, messages: &[session::Message]) -> Result<String> {
        let preamble = self.context.build_preamble();
        let (history, prompt) = self.context.build_messages(messages);
        let tool_defs = self.tool_definitions();

        let (response, tools_used) = self
            .run_loop(&preamble, history, prompt, &tool_defs)
            .await?;
        if !tools_used.is_empty() {
            info!("Turn used tools: {}", tools_used.join(", "));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_char_boundary_respects_multibyte() {
        let s = "héllo";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(300);
        let p = preview(&long, 200);
        assert!(p.starts_with(&"x".repeat(200)));
        assert!(p.ends_with("(300 chars)"));
        assert_eq!(preview("short", 200), "short");
    }
}
