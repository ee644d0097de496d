//! `maestro server` — Start the Maestro HTTP server.

pub async fn run(host: String, port: u16, config_path: Option<String>) -> Result<(), String> {
    let config = maestro_server::ServerConfig {
        host: host.clone(),
        port,
        config_path,
    };

    println!("Starting Maestro server on {}:{}...", host, port);

    let addr = maestro_server::start_server(config).await?;
    println!("Maestro server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
