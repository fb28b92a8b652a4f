use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use assist::logging;
use assist::{AssistConfig, Assistant, RenderedOutput};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "codeassist", about = "Terminal coding assistant with sandboxed Python execution")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "ASSIST_CONFIG")]
    config: Option<PathBuf>,
    /// Log prompts, responses and executions.
    #[arg(long)]
    verbose: bool,
    /// Run extracted code without asking.
    #[arg(long)]
    yes: bool,
}

const HELP: &str = "Commands: /run, /history, /clear, /save <file>, /load <file>, exit";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init(args.verbose);

    let config = AssistConfig::load(args.config.as_deref()).context("loading configuration")?;
    let assistant = Assistant::new(config, args.verbose).context("starting assistant")?;
    let mut editor = DefaultEditor::new()?;

    println!("Coding assistant ready. {HELP}");
    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match input {
            "exit" | "quit" | "bye" => break,
            "/help" => println!("{HELP}"),
            "/clear" => {
                assistant.clear_session();
                println!("Conversation cleared.");
            }
            "/history" => print_history(&assistant),
            "/run" => match assistant.run_last_code().await {
                Ok(rendered) => print_rendered(&rendered),
                Err(err) => println!("{err}"),
            },
            _ if input.starts_with("/save ") => {
                let path = Path::new(input["/save ".len()..].trim());
                match assistant.export_history(path) {
                    Ok(count) => println!("Saved {count} turns to {}", path.display()),
                    Err(err) => println!("Could not save history: {err}"),
                }
            }
            _ if input.starts_with("/load ") => {
                let path = Path::new(input["/load ".len()..].trim());
                match assistant.import_history(path) {
                    Ok(count) => println!("Loaded {count} turns from {}", path.display()),
                    Err(err) => println!("Could not load history: {err}"),
                }
            }
            _ => {
                let reply = match assistant.submit_message(input).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        println!("Error: {err}");
                        continue;
                    }
                };
                println!("\nassistant> {}\n", reply.content);
                let Some(code) = reply.code else {
                    continue;
                };
                if args.yes || confirm(&mut editor)? {
                    let rendered = assistant.request_execution(&code).await;
                    print_rendered(&rendered);
                }
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}

fn confirm(editor: &mut DefaultEditor) -> anyhow::Result<bool> {
    loop {
        match editor.readline("Execute this code? (y/n) ") {
            Ok(answer) => match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            },
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(false),
            Err(err) => return Err(err.into()),
        }
    }
}

fn print_rendered(rendered: &RenderedOutput) {
    println!("{}\n", rendered.text);
}

fn print_history(assistant: &Assistant) {
    let history = assistant.get_history();
    if history.is_empty() {
        println!("No conversation history.");
        return;
    }
    for turn in history {
        println!(
            "[{}] {} ({}) {}",
            turn.index,
            turn.role,
            turn.topic,
            assist::utils::truncate(&turn.content, 200)
        );
    }
}
