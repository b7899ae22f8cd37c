//! Colon commands for interactive mode

mod points;
mod status;
mod tool;

pub use points::{LoadCommand, PointsCommand, SaveCommand};
pub use status::StatusCommand;
pub use tool::ToolCommand;

use zap_session::Session;

/// Result of executing a colon command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the backend)
    Message(String),
    /// Conversation state changed and should be persisted; show the message
    Changed(String),
    /// The command could not be carried out
    Failed(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a command line; `None` means the input is a prompt
pub fn execute_command(input: &str, session: &mut Session) -> Option<CommandResult> {
    let input = input.trim();

    if input == "\\q" {
        return Some(CommandResult::Exit);
    }
    let rest = input.strip_prefix(':')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "" | "help" | "h" | "?" => CommandResult::Message(help_message()),

        "tool" => ToolCommand::execute(args, session),

        "tools" => ToolCommand::list(session),

        "save" => SaveCommand::execute(args, session),

        "load" => LoadCommand::execute(args, session),

        "points" => PointsCommand::execute(session),

        "attach" => attach(args, session),

        "status" => StatusCommand::execute(session),

        "new" => {
            session.start_new();
            CommandResult::Changed("Started a new conversation.".to_string())
        }

        "quit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn attach(args: &str, session: &mut Session) -> CommandResult {
    let ids: Vec<String> = args
        .split([',', ' '])
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        session.clear_attachments();
        return CommandResult::Message("Cleared attachments.".to_string());
    }

    let requested = ids.len();
    session.set_attachments(ids);
    let queued = session.attachments().len();
    if queued < requested {
        CommandResult::Message(format!(
            "Queued {} attachments for the next message ({} dropped, the limit is {}).",
            queued,
            requested - queued,
            zap_stream::MAX_ATTACHMENTS
        ))
    } else {
        CommandResult::Message(format!("Queued {} attachments for the next message.", queued))
    }
}

fn help_message() -> String {
    r#"Available commands:
  :                    Show this help message
  :tool <name|none>    Activate a tool (replaces the current one) or turn it off
  :tools               List available tools
  :save <name>         Save the current response as a named point
  :load <key>          Fork a new conversation from a saved point
  :points              List saved points
  :attach <id,...>     Attach uploaded files to the next message (no ids clears)
  :status              Show conversation and response ids
  :new                 Start a new conversation
  \q                   Exit zap

Examples:
  :tool file           Reply as JSON and write the files it lists
  :save checkpoint     Save as <conversation id>-checkpoint
  :load c1-checkpoint  Continue from that point in a fresh conversation"#
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use zap_session::SessionConfig;
    use zap_stream::{EventStream, ExchangeRequest, Transport};

    /// Transport that never streams but knows the tip of any conversation.
    pub(crate) struct TipTransport;

    #[async_trait]
    impl Transport for TipTransport {
        async fn send(&self, _request: ExchangeRequest) -> zap_stream::Result<EventStream> {
            let stream: EventStream = Box::pin(futures::stream::empty());
            Ok(stream)
        }

        async fn last_response_id(&self, _id: &str) -> zap_stream::Result<Option<String>> {
            Ok(Some("r1".to_string()))
        }
    }

    pub(crate) fn session() -> Session {
        let mut session = Session::new(SessionConfig::default(), Arc::new(TipTransport));
        session.set_tools(crate::tools::builtin());
        session
    }

    pub(crate) async fn resumed_session() -> Session {
        let mut session = session();
        session.resume("c1").await.unwrap();
        session
    }

    #[test]
    fn test_prompts_are_not_commands() {
        let mut session = session();
        assert_eq!(execute_command("hello there", &mut session), None);
        assert_eq!(execute_command("what is 2:3?", &mut session), None);
    }

    #[test]
    fn test_exit_and_help() {
        let mut session = session();
        assert_eq!(execute_command("\\q", &mut session), Some(CommandResult::Exit));
        assert!(matches!(
            execute_command(":", &mut session),
            Some(CommandResult::Message(m)) if m.starts_with("Available commands")
        ));
        assert_eq!(
            execute_command(":frobnicate", &mut session),
            Some(CommandResult::Unknown("frobnicate".into()))
        );
    }

    #[test]
    fn test_attach_queues_and_caps() {
        let mut session = session();
        execute_command(":attach f1, f2 f3", &mut session);
        assert_eq!(session.attachments(), ["f1", "f2", "f3"]);

        let many = (0..12).map(|i| format!("f{}", i)).collect::<Vec<_>>().join(",");
        let result = execute_command(&format!(":attach {}", many), &mut session);
        assert!(matches!(result, Some(CommandResult::Message(m)) if m.contains("2 dropped")));
        assert_eq!(session.attachments().len(), zap_stream::MAX_ATTACHMENTS);

        execute_command(":attach", &mut session);
        assert!(session.attachments().is_empty());
    }

    #[tokio::test]
    async fn test_new_clears_conversation() {
        let mut session = resumed_session().await;
        let result = execute_command(":new", &mut session);
        assert!(matches!(result, Some(CommandResult::Changed(_))));
        assert_eq!(session.conversation_id(), None);
        assert_eq!(session.last_response_id(), None);
    }
}
