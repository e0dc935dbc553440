use crate::models::{Conversation, Message, Role};

pub fn export_to_markdown(conversation: &Conversation, messages: &[Message]) -> String {
    let mut output = format!("# {}\n\n", conversation.title);
    output.push_str(&format!(
        "> Date: {}\n\n",
        conversation.created_at.format("%Y-%m-%d %H:%M")
    ));
    output.push_str("---\n\n");

    for msg in messages.iter().filter(|m| m.conversation_id == conversation.id) {
        let role_label = match msg.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        output.push_str(&format!("### {}\n\n{}\n\n", role_label, msg.content));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use crate::services::ledger::MessageLedger;

    #[test]
    fn test_export_lists_turns_in_order() {
        let conversation = Conversation::new("c1".to_string(), "Greetings".to_string());
        let ledger = MessageLedger::new();
        ledger.append_message(NewMessage::user("c1", "Hello")).unwrap();
        ledger.append_message(NewMessage::user("c2", "Elsewhere")).unwrap();
        ledger.append_message(NewMessage::assistant("c1", "Hi there")).unwrap();

        let markdown = export_to_markdown(&conversation, &ledger.messages());
        assert!(markdown.starts_with("# Greetings\n"));
        assert!(!markdown.contains("Elsewhere"));
        let you = markdown.find("### You\n\nHello").unwrap();
        let assistant = markdown.find("### Assistant\n\nHi there").unwrap();
        assert!(you < assistant);
    }
}
