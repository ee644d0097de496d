//! `maestro call` — Send one message straight to an agent.

use maestro_core::state::AppState;

pub async fn run(state: &AppState, agent_id: &str, message: &str) -> Result<(), String> {
    let response = state
        .coordinator
        .call_agent(agent_id, message)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", response);
    Ok(())
}
