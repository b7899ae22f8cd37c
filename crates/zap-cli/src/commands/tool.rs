//! :tool and :tools - tool selection

use super::CommandResult;
use zap_session::Session;

pub struct ToolCommand;

impl ToolCommand {
    pub fn execute(args: &str, session: &mut Session) -> CommandResult {
        if args.is_empty() {
            return match session.active_tool() {
                Some(name) => CommandResult::Message(format!("Active tool: {}", name)),
                None => CommandResult::Message("No active tool.".to_string()),
            };
        }

        if args.eq_ignore_ascii_case("none") || args.eq_ignore_ascii_case("off") {
            // Deactivating can't fail.
            let _ = session.set_active_tool(None);
            return CommandResult::Message("Tool deactivated.".to_string());
        }

        match session.set_active_tool(Some(args)) {
            Ok(()) => CommandResult::Message(format!("Active tool: {}", args)),
            Err(e) => CommandResult::Failed(format!("{} (see :tools)", e)),
        }
    }

    pub fn list(session: &Session) -> CommandResult {
        if session.tools().is_empty() {
            return CommandResult::Message("No tools available.".to_string());
        }

        let active = session.active_tool();
        let mut output = String::from("Available tools:\n");
        for tool in session.tools().iter() {
            let marker = if active == Some(tool.name()) { "*" } else { " " };
            output.push_str(&format!(" {} {:<10} {}\n", marker, tool.name(), tool.description()));
        }
        CommandResult::Message(output.trim_end().to_string())
    }
}
