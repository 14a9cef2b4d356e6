//! Prompt construction for the voice conversation.
//!
//! The output is spoken aloud, so the instructions push the model toward
//! speakable text: no symbols, no self-identification, no apologies for
//! latency the user never experienced.

use crate::agents::{AgentBehavior, AgentConfig};
use crate::pipeline::messages::{ConversationMessage, Role};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a conversational voice assistant.";

const SPOKEN_OUTPUT_RULES: &str = "\n\nIMPORTANT INSTRUCTIONS:\n\
- Respond as a real person having a natural conversation. Do NOT identify yourself as an AI or language model.\n\
- Your output will be converted to speech, so write EXACTLY what should be spoken.\n\
- Do NOT write symbols like *, =, #, etc. Spell them out if needed (e.g., 'asterisk', 'equals', 'hashtag').\n\
- Keep responses conversational and natural. Avoid formal or robotic language.\n\
- Do NOT apologize for delays or processing time - the user experiences instant responses.\n\
- Be concise. This is a voice conversation, not a text chat.";

fn behavior_rule(behavior: AgentBehavior) -> &'static str {
    match behavior {
        AgentBehavior::Professional => {
            "\nBe professional, courteous, and helpful while maintaining focus."
        }
        AgentBehavior::Character => {
            "\nMaintain your character and persona throughout the conversation."
        }
        AgentBehavior::Chatty => {
            "\nBe friendly and conversational, as if speaking with a close companion."
        }
        AgentBehavior::Concise => {
            "\nProvide quick, straightforward answers without unnecessary details."
        }
        AgentBehavior::Empathetic => {
            "\nBe caring and compassionate, showing emotional intelligence."
        }
    }
}

/// Build the full prompt for one user turn.
///
/// `history` is the whole conversation; only the trailing `history_tail`
/// messages are included to keep time-to-first-token low. The user message
/// is appended verbatim after a `User:` marker, and the prompt ends with
/// the `Assistant:` cue the model completes.
pub fn build_prompt(
    agent: Option<&AgentConfig>,
    history: &[ConversationMessage],
    user_message: &str,
    history_tail: usize,
) -> String {
    let mut prompt = String::new();

    match agent {
        Some(agent) => {
            if agent.system_prompt.trim().is_empty() {
                prompt.push_str(DEFAULT_SYSTEM_PROMPT);
            } else {
                prompt.push_str(&agent.system_prompt);
            }
            prompt.push_str(SPOKEN_OUTPUT_RULES);
            prompt.push_str(behavior_rule(agent.behavior));

            if let Some(knowledge) = &agent.custom_knowledge {
                prompt.push_str("\n\nKnowledge base:\n");
                prompt.push_str(knowledge);
            }
            if agent.guardrails_enabled {
                prompt.push_str(
                    "\n\nIMPORTANT: Only use information from the provided knowledge base. \
                     Do not make up or guess information.",
                );
            }
        }
        None => {
            prompt.push_str(DEFAULT_SYSTEM_PROMPT);
            prompt.push_str(SPOKEN_OUTPUT_RULES);
        }
    }

    prompt.push_str("\n\n");

    let tail_start = history.len().saturating_sub(history_tail);
    for msg in &history[tail_start..] {
        let role = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(role);
        prompt.push_str(": ");
        prompt.push_str(&msg.content);
        prompt.push('\n');
    }

    prompt.push_str("User: ");
    prompt.push_str(user_message);
    prompt.push_str("\nAssistant:");
    prompt
}
