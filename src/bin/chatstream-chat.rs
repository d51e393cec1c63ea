//! Interactive chat against a streaming chat endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! chatstream-chat
//!
//! # Specify a model and endpoint
//! chatstream-chat --model llama3 --url http://gpu-box:8000/api/chat
//!
//! # Read defaults from a YAML file
//! chatstream-chat --config chatstream.yaml
//!
//! # Disable colors (useful for piping output)
//! chatstream-chat --no-color
//! ```
//!
//! Set `CHATSTREAM_LOG=debug` to see session lifecycle logs on stderr.
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/model <name>` - Change the model
//! - `/history` - Show the conversation so far
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application
//!
//! Ctrl+C while a reply streams stops it and keeps the partial text.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use chatstream::chat::{
    ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text, parse_command,
};
use chatstream::{ChatClient, ConversationController, ConversationUpdate};

/// Environment variable holding the log filter.
const LOG_ENV_VAR: &str = "CHATSTREAM_LOG";

/// Main entry point for the chatstream-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let (args, _) = ChatArgs::from_command_line_relaxed("chatstream-chat [OPTIONS]");
    let config = ChatConfig::load(args)?;

    let client = ChatClient::with_options(Some(config.endpoint.clone()), config.timeout)?;
    let mut controller = ConversationController::new(Arc::new(client), config.model.clone());
    if let Some(greeting) = config.greeting.clone() {
        controller = controller.with_greeting(greeting);
    }
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Ctrl+C while streaming raises the flag and wakes the reply loop.  At the
    // prompt rustyline reports it as `ReadlineError::Interrupted` instead.
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt = Arc::new(Notify::new());
    {
        let interrupted = Arc::clone(&interrupted);
        let interrupt = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::Relaxed);
            interrupt.notify_one();
        })?;
    }

    println!("Chat (model: {}, endpoint: {})", controller.model(), config.endpoint);
    println!("Type /help for commands, /quit to exit\n");
    for message in controller.transcript() {
        renderer.print_message(&message);
    }

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

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
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Model(model) => {
                            controller.set_model(model.clone());
                            renderer.print_info(&format!("Model changed to: {model}"));
                        }
                        ChatCommand::History => {
                            for message in controller.transcript() {
                                renderer.print_message(&message);
                            }
                        }
                        ChatCommand::Stats => print_stats(&controller),
                        ChatCommand::ShowConfig => print_config(&config, &controller),
                        ChatCommand::Invalid(message) => renderer.print_error(&message),
                    }
                    continue;
                }

                if controller.submit(line).is_none() {
                    continue;
                }
                println!("Assistant:");
                stream_reply(&mut controller, &mut renderer, &interrupted, &interrupt).await;
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

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints the active reply as it streams until it ends or Ctrl+C stops it.
async fn stream_reply(
    controller: &mut ConversationController,
    renderer: &mut impl Renderer,
    interrupted: &AtomicBool,
    interrupt: &Notify,
) {
    loop {
        let update = tokio::select! {
            update = controller.next_update() => Some(update),
            _ = interrupt.notified() => None,
        };
        let Some(update) = update else {
            // A permit left over from an earlier Ctrl+C has the flag cleared.
            if interrupted.swap(false, Ordering::Relaxed) && controller.stop() {
                renderer.print_interrupted();
                break;
            }
            continue;
        };
        let Some(update) = update else {
            break;
        };
        match update {
            ConversationUpdate::Token { text, finished, .. } => {
                renderer.print_text(&text);
                if finished {
                    renderer.finish_response();
                }
            }
            ConversationUpdate::Completed { .. } => renderer.finish_response(),
            ConversationUpdate::Failed { error, .. } => renderer.print_error(&error),
            ConversationUpdate::Stopped { .. } => renderer.print_interrupted(),
        }
    }
}

fn print_stats(controller: &ConversationController) {
    let stats = controller.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", controller.model());
    println!("      Messages: {}", controller.store().len());
    println!("      Turns: {}", stats.turns);
    println!(
        "      Replies: {} completed / {} failed / {} stopped",
        stats.completed, stats.failed, stats.stopped
    );
    println!("      Tokens received: {}", stats.tokens);
    match controller.error() {
        Some(error) => println!("      Last error: {error}"),
        None => println!("      Last error: (none)"),
    }
}

fn print_config(config: &ChatConfig, controller: &ConversationController) {
    println!("    Current Configuration:");
    println!("      Model: {}", controller.model());
    println!("      Endpoint: {}", config.endpoint);
    match config.timeout {
        Some(timeout) => println!("      Timeout: {}s", timeout.as_secs()),
        None => println!("      Timeout: (none)"),
    }
    match config.greeting.as_deref() {
        Some(greeting) => println!("      Greeting: {greeting}"),
        None => println!("      Greeting: (disabled)"),
    }
    println!(
        "      Color: {}",
        if config.use_color { "on" } else { "off" }
    );
}
