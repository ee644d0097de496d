//! Maestro CLI — command-line interface for agent orchestration.
//!
//! Reuses the same core (maestro-core) and server bootstrap
//! (maestro-server) as the HTTP API.

use clap::{Parser, Subcommand};

use maestro_cli::commands;

/// Maestro — orchestrate remote capability agents
#[derive(Parser)]
#[command(name = "maestro", version, about = "Maestro — orchestrate remote capability agents")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "MAESTRO_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Maestro HTTP server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3300)]
        port: u16,
    },

    /// Inspect and manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Run and inspect workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Send one message directly to an agent
    Call {
        /// Agent ID
        agent: String,
        /// Message text
        message: String,
    },

    /// Interactive chat with the coordinator
    Chat {
        /// Session key (a new one is generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// List configured agents and their reachability
    List,
    /// Show one agent
    Status {
        /// Agent ID
        id: String,
    },
    /// Register an agent for this invocation and probe it
    Register {
        /// Agent ID
        id: String,
        /// Base URL of the agent
        endpoint: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Comma-separated capability tags
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
        /// Path for task requests
        #[arg(long)]
        task_path: Option<String>,
    },
    /// Probe every configured agent now
    Probe,
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Run a catalog workflow by name, or a definition file
    Run {
        /// Catalog workflow name
        name: Option<String>,
        /// Context entries as key=value (value parsed as JSON when possible)
        #[arg(long = "context", short = 'c')]
        context: Vec<String>,
        /// Run a YAML definition file instead of a catalog workflow
        #[arg(long)]
        file: Option<String>,
    },
    /// List the workflow catalog
    Templates,
    /// Validate a workflow YAML file without executing it
    Validate {
        /// Path to the YAML file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro_core=warn,maestro_server=warn,maestro_cli=info".into()),
        )
        .init();

    let config = cli.config.as_deref();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Server { host, port } => {
                commands::server::run(host, port, cli.config.clone()).await
            }

            Commands::Agent { action } => {
                let state = commands::init_state(config).await;
                match action {
                    AgentAction::List => commands::agent::list(&state).await,
                    AgentAction::Status { id } => commands::agent::status(&state, &id).await,
                    AgentAction::Register {
                        id,
                        endpoint,
                        name,
                        capabilities,
                        task_path,
                    } => {
                        commands::agent::register(
                            &state,
                            &id,
                            &endpoint,
                            name.as_deref(),
                            capabilities,
                            task_path.as_deref(),
                        )
                        .await
                    }
                    AgentAction::Probe => commands::agent::probe(&state).await,
                }
            }

            Commands::Workflow { action } => match action {
                WorkflowAction::Run {
                    name,
                    context,
                    file,
                } => {
                    let state = commands::init_state(config).await;
                    commands::workflow::run(&state, name.as_deref(), file.as_deref(), &context).await
                }
                WorkflowAction::Templates => {
                    let state = commands::init_state(config).await;
                    commands::workflow::templates(&state).await
                }
                WorkflowAction::Validate { file } => commands::workflow::validate(&file).await,
            },

            Commands::Call { agent, message } => {
                let state = commands::init_state(config).await;
                commands::call::run(&state, &agent, &message).await
            }

            Commands::Chat { session } => {
                let state = commands::init_state(config).await;
                let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                commands::chat::run(&state, &session).await
            }
        }
    } else {
        // No subcommand — show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
