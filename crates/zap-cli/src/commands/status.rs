//! :status - show where the next message will attach

use super::CommandResult;
use zap_session::Session;

pub struct StatusCommand;

impl StatusCommand {
    pub fn execute(session: &Session) -> CommandResult {
        let mut output = String::from("Conversation Status\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        output.push_str(&format!(
            "Conversation: {}\n",
            session.conversation_id().unwrap_or("(new)")
        ));
        output.push_str(&format!(
            "Last response: {}\n",
            session.last_response_id().unwrap_or("(none)")
        ));
        output.push_str(&format!(
            "Active tool:  {}\n",
            session.active_tool().unwrap_or("(none)")
        ));
        output.push_str(&format!("Attachments:  {}\n", session.attachments().len()));
        output.push_str(&format!("Saved points: {}", session.saved_points().len()));

        CommandResult::Message(output)
    }
}
