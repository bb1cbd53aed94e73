//! Interactive chat application for the ZeroX backend.
//!
//! This binary provides a streaming REPL on top of the `zerox` client. The
//! login is kept in a credential file so it survives restarts.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! zerox-chat
//!
//! # Talk to a remote backend with a specific model
//! zerox-chat --base-url https://zerox.example.com/api/v1/ --model llama-3.1-8b-instant
//!
//! # Disable colors (useful for piping output)
//! zerox-chat --no-color
//! ```
//!
//! Set `RUST_LOG=zerox=debug` to see dispatch, refresh, and stream diagnostics.

use std::borrow::Cow;
use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::completion::Completer;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{ColorMode, Editor, Helper};
use tokio::sync::broadcast::Receiver;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use zerox::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use zerox::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, RegisterRequest, SessionEvent,
    ZeroX,
};

/// Conversations listed by `/conversations`.
const LIST_LIMIT: u32 = 20;

type LineEditor = Editor<PasswordMask, DefaultHistory>;

/// Hides typed characters while `masking` is set.
struct PasswordMask {
    masking: bool,
}

impl Highlighter for PasswordMask {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if self.masking {
            Cow::Owned(" ".repeat(line.chars().count()))
        } else {
            Cow::Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, kind: CmdKind) -> bool {
        match kind {
            CmdKind::MoveCursor => false,
            _ => self.masking,
        }
    }
}

impl Completer for PasswordMask {
    type Candidate = String;
}

impl Hinter for PasswordMask {
    type Hint = String;
}

impl Validator for PasswordMask {}

impl Helper for PasswordMask {}

/// Main entry point for the zerox-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    let (args, _) = ChatArgs::from_command_line_relaxed("zerox-chat [OPTIONS]");
    let config = ChatConfig::from(&args);
    let use_color = config.use_color;

    let credentials: Arc<dyn CredentialStore> = match args.credentials_path() {
        Some(path) => Arc::new(FileCredentialStore::open(path)?),
        None => Arc::new(MemoryCredentialStore::new()),
    };
    let client = ZeroX::with_options(credentials, args.base_url.clone(), None)?;
    let mut events = client.subscribe();

    let mut session = ChatSession::new(client.clone(), config);
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = LineEditor::new()?;
    rl.set_helper(Some(PasswordMask { masking: false }));

    // Ctrl+C while a reply streams stops that reply.
    let canceller = session.canceller();
    ctrlc::set_handler(move || {
        canceller.cancel();
    })?;

    println!("ZeroX Chat (model: {})", session.config().model);
    if client.is_authenticated() {
        println!("Type /help for commands, /quit to exit\n");
    } else {
        println!("Not logged in. Use /login <email> or /register <email> <username>.\n");
    }

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::New => {
                            session.new_chat();
                            renderer.print_info("Started a new conversation.");
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Model(model) => {
                            session.set_model(model.clone());
                            renderer.print_info(&format!("Model changed to: {model}"));
                        }
                        ChatCommand::Models => {
                            let listed = if client.is_authenticated() {
                                client.list_models().await
                            } else {
                                client.list_free_models().await
                            };
                            match listed {
                                Ok(models) => {
                                    let current = session.config().model.clone();
                                    for model in models {
                                        let marker = if model.id == current { "*" } else { " " };
                                        let tier = if model.is_free { "free" } else { "paid" };
                                        println!(
                                            "  {marker} {:<32} {} ({}, {}, max {} tokens)",
                                            model.id,
                                            model.name,
                                            model.provider,
                                            tier,
                                            model.max_tokens
                                        );
                                    }
                                }
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Temperature(value) => {
                            session.set_temperature(value);
                            renderer.print_info(&format!("temperature set to {value:.2}"));
                        }
                        ChatCommand::MaxTokens(value) => {
                            session.set_max_tokens(value);
                            renderer.print_info(&format!("max_tokens set to {value}"));
                        }
                        ChatCommand::Login(email) => {
                            let password = match read_password(&mut rl) {
                                Ok(password) => password,
                                Err(err) => {
                                    renderer.print_error(&format!("Input error: {err}"));
                                    continue;
                                }
                            };
                            match client.login(email, password).await {
                                Ok(tokens) => {
                                    let name = tokens
                                        .user
                                        .map(|user| user.username)
                                        .unwrap_or_else(|| "user".to_string());
                                    renderer.print_info(&format!("Logged in as {name}."));
                                }
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Register { email, username } => {
                            let password = match read_password(&mut rl) {
                                Ok(password) => password,
                                Err(err) => {
                                    renderer.print_error(&format!("Input error: {err}"));
                                    continue;
                                }
                            };
                            let request = RegisterRequest {
                                email,
                                username,
                                password,
                                full_name: None,
                            };
                            match client.register(request).await {
                                Ok(_) => renderer.print_info("Account created and logged in."),
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Logout => {
                            session.new_chat();
                            match client.logout().await {
                                Ok(()) => renderer.print_info("Logged out."),
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Whoami => match client.me().await {
                            Ok(user) => renderer.print_info(&format!(
                                "{} <{}> ({}, {} messages today)",
                                user.username, user.email, user.role, user.daily_messages
                            )),
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Conversations => {
                            match client.list_conversations(0, LIST_LIMIT).await {
                                Ok(conversations) if conversations.is_empty() => {
                                    renderer.print_info("No conversations yet.");
                                }
                                Ok(conversations) => {
                                    for conversation in conversations {
                                        println!(
                                            "    {:>6}  {}  ({} messages)",
                                            conversation.id,
                                            conversation.title,
                                            conversation.message_count.unwrap_or(0)
                                        );
                                    }
                                }
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Open(id) => match session.load_conversation(id).await {
                            Ok(()) => {
                                for message in session.messages() {
                                    println!("    {}: {}", message.role, message.content);
                                }
                                renderer.print_info(&format!("Continuing conversation {id}."));
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Delete(id) => match client.delete_conversation(id).await {
                            Ok(()) => {
                                if session.conversation_id() == Some(id) {
                                    session.new_chat();
                                }
                                renderer.print_info(&format!("Deleted conversation {id}."));
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Stats => {
                            print_stats(&session);
                        }
                        ChatCommand::ShowConfig => {
                            print_config(&session);
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    report_session_events(&mut events, &mut renderer);
                    continue;
                }

                if let Err(err) = session.send(line, &mut renderer).await {
                    renderer.print_error(&err.to_string());
                }
                report_session_events(&mut events, &mut renderer);
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

fn read_password(rl: &mut LineEditor) -> Result<String, ReadlineError> {
    set_masking(rl, true);
    let password = rl.readline("Password: ");
    set_masking(rl, false);
    Ok(password?.trim_end_matches(['\r', '\n']).to_string())
}

fn set_masking(rl: &mut LineEditor, masking: bool) {
    if let Some(helper) = rl.helper_mut() {
        helper.masking = masking;
    }
    rl.set_color_mode(if masking {
        ColorMode::Forced
    } else {
        ColorMode::Enabled
    });
}

fn report_session_events(events: &mut Receiver<SessionEvent>, renderer: &mut dyn Renderer) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Invalidated { reason } = event {
            renderer.print_error(&format!(
                "Session expired ({reason}). Use /login <email> to sign in again."
            ));
        }
    }
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", stats.model);
    match stats.conversation_id {
        Some(id) => println!("      Conversation: {id}"),
        None => println!("      Conversation: (new)"),
    }
    println!("      Messages: {}", stats.message_count);
    println!("      State: {}", stats.phase);
    println!(
        "      Turns: {} done, {} errored, {} cancelled",
        stats.turns_done, stats.turns_errored, stats.turns_cancelled
    );
}

fn print_config(session: &ChatSession) {
    let config = session.config();
    println!("    Current Configuration:");
    println!("      Model: {}", config.model);
    println!("      Temperature: {:.2}", config.temperature);
    println!("      Max tokens: {}", config.max_tokens);
    println!(
        "      Logged in: {}",
        if session.client().is_authenticated() {
            "yes"
        } else {
            "no"
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_mask_hides_input_only_while_masking() {
        let mut mask = PasswordMask { masking: true };
        assert_eq!(mask.highlight("hunter2", 7), "       ");
        assert!(mask.highlight_char("hunter2", 7, CmdKind::Other));
        assert!(!mask.highlight_char("hunter2", 7, CmdKind::MoveCursor));

        mask.masking = false;
        assert_eq!(mask.highlight("hello", 5), "hello");
        assert!(!mask.highlight_char("hello", 5, CmdKind::Other));
    }
}
