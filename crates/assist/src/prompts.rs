use crate::context::ConversationTurn;
use crate::llm::Message;

pub const SYSTEM_PROMPT: &str = r#"You are a helpful coding assistant that writes, explains and debugs Python.

When you write code:
- Put runnable Python in a single fenced block tagged `python`.
- Keep snippets self-contained: they run in a fresh, isolated interpreter with no network access, no subprocesses and writes only to the current directory.
- Print the results you want the user to see.

Earlier turns of this conversation are included when they matter to the current request. When the user refers to "it" or "that code", revise the most recent relevant code instead of starting over. Messages from the system role report the outcome of code the user executed; use them to fix errors."#;

/// System prompt followed by the selected window, oldest first.
pub fn build_messages(window: &[ConversationTurn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(window.iter().map(Message::from));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Role, TopicLabel};

    #[test]
    fn window_follows_the_system_prompt() {
        let window = vec![
            ConversationTurn::for_test(Role::User, "create a Flask app", TopicLabel::CodeGeneration),
            ConversationTurn::for_test(Role::Assistant, "```python\n```", TopicLabel::CodeGeneration),
        ];
        let messages = build_messages(&window);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1], Message::user("create a Flask app"));
        assert_eq!(messages[2].role, "assistant");
    }
}
