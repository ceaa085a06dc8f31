//! Interactive command parsing for the `run` session

use anyhow::Result;

/// Commands typed at the interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    /// Send a text message to a remote
    Send { target: String, message: String },
    /// Authorize a remote
    Allow { target: String },
    /// Deauthorize a remote and end its session
    Remove { target: String },
    /// End the session with a remote
    Stop { target: String },
    /// Show connection statistics for a remote
    Stats { target: String },
    /// List allowed remotes and live sessions
    List,
    /// Print command help
    Help,
    /// Quit the application
    Quit,
}

fn single_target(parts: &[&str], usage: &str) -> Result<String> {
    match parts {
        [_, target] => Ok(target.to_string()),
        _ => Err(anyhow::anyhow!("Usage: {}", usage)),
    }
}

/// Parse one input line; blank lines yield `None`
pub fn parse_interactive_command(input: &str) -> Result<Option<InteractiveCommand>> {
    let input = input.trim();

    if input.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = input.split_whitespace().collect();

    match parts[0] {
        "/send" => {
            if parts.len() < 3 {
                return Err(anyhow::anyhow!("Usage: /send <remote-id> <message>"));
            }
            let rest = input[parts[0].len()..].trim_start();
            let message = rest[parts[1].len()..].trim().to_string();
            Ok(Some(InteractiveCommand::Send {
                target: parts[1].to_string(),
                message,
            }))
        }
        "/allow" => Ok(Some(InteractiveCommand::Allow {
            target: single_target(&parts, "/allow <remote-id>")?,
        })),
        "/remove" => Ok(Some(InteractiveCommand::Remove {
            target: single_target(&parts, "/remove <remote-id>")?,
        })),
        "/stop" => Ok(Some(InteractiveCommand::Stop {
            target: single_target(&parts, "/stop <remote-id>")?,
        })),
        "/stats" => Ok(Some(InteractiveCommand::Stats {
            target: single_target(&parts, "/stats <remote-id>")?,
        })),
        "/list" => Ok(Some(InteractiveCommand::List)),
        "/help" | "?" => Ok(Some(InteractiveCommand::Help)),
        "/quit" | "/exit" | "/q" => Ok(Some(InteractiveCommand::Quit)),
        _ => Err(anyhow::anyhow!(
            "Unknown command: {}. Type /help for available commands.",
            parts[0]
        )),
    }
}

pub fn print_help() {
    println!("\nInteractive commands:");
    println!("  /send <remote-id> <message>  - Send a chat message");
    println!("  /allow <remote-id>           - Allow a remote to chat with you");
    println!("  /remove <remote-id>          - Disallow a remote and end its session");
    println!("  /stop <remote-id>            - End the session with a remote");
    println!("  /stats <remote-id>           - Show session statistics");
    println!("  /list                        - Show allowed remotes and sessions");
    println!("  /help                        - Show this help");
    println!("  /quit                        - Exit the application");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_keeps_message_spacing() {
        let command = parse_interactive_command("/send bob hello  there, bob ")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            InteractiveCommand::Send {
                target: "bob".to_string(),
                message: "hello  there, bob".to_string(),
            }
        );
    }

    #[test]
    fn test_target_commands() {
        assert_eq!(
            parse_interactive_command("/allow carol").unwrap(),
            Some(InteractiveCommand::Allow {
                target: "carol".to_string()
            })
        );
        assert_eq!(
            parse_interactive_command("/stats bob").unwrap(),
            Some(InteractiveCommand::Stats {
                target: "bob".to_string()
            })
        );
        assert!(parse_interactive_command("/stop").is_err());
        assert!(parse_interactive_command("/remove a b").is_err());
    }

    #[test]
    fn test_blank_and_unknown_input() {
        assert_eq!(parse_interactive_command("   ").unwrap(), None);
        assert_eq!(
            parse_interactive_command("/q").unwrap(),
            Some(InteractiveCommand::Quit)
        );
        assert!(parse_interactive_command("/dance").is_err());
        assert!(parse_interactive_command("/send bob").is_err());
    }
}
