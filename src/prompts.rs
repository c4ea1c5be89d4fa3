use crate::llm::ChatMessage;

const SEARCH_EXPERT_PROMPT: &str = "\
As a professional search expert, you possess the ability to search for any information on the web.
For each user query, utilize the search results to their fullest potential to provide additional information and assistance in your response.
If there are any images relevant to your answer, be sure to include them as well.
Aim to directly address the user's question, augmenting your response with insights gleaned from the search results";

const ASSISTANT_PROMPT: &str = "You are a helpful AI assistant. Use the provided search results to answer questions accurately. Include relevant information from the search results in your responses.";

/// Single-question chat: search context and the question folded into one user turn.
pub fn build_chat_prompt(question: &str, context: &str) -> Vec<ChatMessage> {
    let combined = format!("Context: \n{context}\n\nQuestion: \n{question}\n");
    vec![
        ChatMessage::system(SEARCH_EXPERT_PROMPT),
        ChatMessage::user(combined),
    ]
}

/// Multi-turn completion: history first, then the web context as an assistant turn.
pub fn build_completion_prompt(history: &[ChatMessage], context: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(ASSISTANT_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::assistant(format!(
        "Here is some relevant context from the web:\n{context}"
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_prompt_carries_context_and_question() {
        let messages = build_chat_prompt("Who won?", "[{\"url\":\"u\"}]");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("As a professional search expert"));
        assert_eq!(
            messages[1].content,
            "Context: \n[{\"url\":\"u\"}]\n\nQuestion: \nWho won?\n"
        );
    }

    #[test]
    fn completion_prompt_appends_context_after_history() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello"), ChatMessage::user("news?")];
        let messages = build_completion_prompt(&history, "Search Results:");
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user", "assistant"]);
        assert_eq!(
            messages.last().unwrap().content,
            "Here is some relevant context from the web:\nSearch Results:"
        );
    }
}
