//! `maestro chat` — Interactive chat with the coordinator.

use std::io::{self, BufRead, Write};

use maestro_core::state::AppState;

use super::parse_context_pairs;

pub async fn run(state: &AppState, session_id: &str) -> Result<(), String> {
    println!("Maestro Chat");
    println!("══════════════════════════════════════");
    println!("Session: {}", session_id);
    println!(
        "Reasoning backend: {}",
        if state.coordinator.has_reasoning() { "configured" } else { "none (set reasoning.api_key)" }
    );
    println!("══════════════════════════════════════");
    println!();
    println!("Type your message and press Enter. Type /quit to exit.");
    println!("Commands: /agents, /workflows, /run <name> key=value..., /quit");
    println!();
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let turns = run_session(state, session_id, stdin.lock()).await?;
    println!("{} turn(s).", turns);
    Ok(())
}

/// Drive a chat session from `reader` until EOF or `/quit`. Returns the
/// number of inputs handled.
pub async fn run_session<R: BufRead>(
    state: &AppState,
    session_id: &str,
    reader: R,
) -> Result<usize, String> {
    let mut turns = 0;

    for line in reader.lines() {
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        match trimmed {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/agents" => {
                for agent in state.directory.list().await {
                    println!("  {} [{}] {}", agent.id, agent.reachability.as_str(), agent.endpoint);
                }
            }
            "/workflows" => {
                for definition in state.engine.templates().await {
                    println!("  {}", definition.name);
                }
            }
            _ if trimmed.starts_with("/run ") => {
                let mut parts = trimmed["/run ".len()..].split_whitespace();
                let name = parts.next().unwrap_or_default().to_string();
                let pairs: Vec<String> = parts.map(str::to_string).collect();
                match parse_context_pairs(&pairs) {
                    Ok(context) => match state.coordinator.run_named_workflow(&name, context).await {
                        Ok(text) => print!("{}", text),
                        Err(e) => println!("Workflow error: {}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            _ => match state.coordinator.handle(session_id, trimmed).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => println!("Error: {}", e),
            },
        }
        turns += 1;

        print!("\n> ");
        io::stdout().flush().ok();
    }

    Ok(turns)
}
