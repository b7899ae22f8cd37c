//! :save, :load and :points - saved point management

use super::CommandResult;
use zap_session::{Error, Session};

pub struct SaveCommand;

impl SaveCommand {
    pub fn execute(name: &str, session: &mut Session) -> CommandResult {
        match session.save_point(name) {
            Ok((key, point)) => CommandResult::Changed(format!(
                "Saved point '{}' at response {}",
                key, point.previous_response_id
            )),
            Err(Error::NothingToSave) => {
                CommandResult::Failed("Nothing to save yet: send a message first.".to_string())
            }
            Err(Error::EmptyName) => CommandResult::Failed("Usage: :save <name>".to_string()),
            Err(e) => CommandResult::Failed(e.to_string()),
        }
    }
}

pub struct LoadCommand;

impl LoadCommand {
    pub fn execute(key: &str, session: &mut Session) -> CommandResult {
        if key.is_empty() {
            return CommandResult::Failed("Usage: :load <key> (see :points)".to_string());
        }
        match session.load_point(key) {
            Ok(conversation_id) => CommandResult::Changed(format!(
                "Loaded '{}' into new conversation {}",
                key, conversation_id
            )),
            Err(e) => CommandResult::Failed(e.to_string()),
        }
    }
}

pub struct PointsCommand;

impl PointsCommand {
    pub fn execute(session: &Session) -> CommandResult {
        let points = session.saved_points();
        if points.is_empty() {
            return CommandResult::Message("No saved points.".to_string());
        }

        let mut output = String::from("Saved points:\n");
        for (key, point) in points {
            output.push_str(&format!("  {}  (response {})\n", key, point.previous_response_id));
        }
        CommandResult::Message(output.trim_end().to_string())
    }
}
