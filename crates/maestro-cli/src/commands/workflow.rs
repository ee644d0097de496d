//! `maestro workflow` — Run and inspect workflows.

use maestro_core::coordinator::format_instance;
use maestro_core::models::workflow::WorkflowStatus;
use maestro_core::state::AppState;
use maestro_core::workflow::WorkflowDefinition;

use super::parse_context_pairs;

/// Run a catalog workflow by name, or a definition file when `file` is given.
pub async fn run(
    state: &AppState,
    name: Option<&str>,
    file: Option<&str>,
    context_pairs: &[String],
) -> Result<(), String> {
    let context = parse_context_pairs(context_pairs)?;

    let definition = match (file, name) {
        (Some(path), _) => {
            let definition = WorkflowDefinition::from_file(path).map_err(|e| e.to_string())?;
            println!("📄 Loaded workflow: {} ({})", definition.name, path);
            definition
        }
        (None, Some(name)) => state.engine.definition(name).await.map_err(|e| e.to_string())?,
        (None, None) => return Err("Specify a workflow name or --file".to_string()),
    };
    println!("   {} step(s)", definition.steps.len());
    println!();

    let instance = state
        .engine
        .execute(&definition, context)
        .await
        .map_err(|e| e.to_string())?;

    print!("{}", format_instance(&instance));

    if instance.overall_status == WorkflowStatus::Completed {
        Ok(())
    } else {
        Err(format!(
            "Workflow '{}' ended {}",
            instance.definition_ref,
            instance.overall_status.as_str()
        ))
    }
}

/// List the workflow catalog.
pub async fn templates(state: &AppState) -> Result<(), String> {
    for definition in state.engine.templates().await {
        let needs: Vec<String> = definition.required_context_keys().into_iter().collect();
        println!("{}", definition.name);
        if let Some(description) = &definition.description {
            println!("   {}", description);
        }
        println!(
            "   steps: {}",
            definition
                .steps
                .iter()
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>()
                .join(" → ")
        );
        if !needs.is_empty() {
            println!("   context: {}", needs.join(", "));
        }
    }
    Ok(())
}

/// Validate a workflow YAML file without executing it.
pub async fn validate(workflow_file: &str) -> Result<(), String> {
    let workflow = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    let order = workflow.topological_order().map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", workflow.name);
    println!("   Steps: {}", workflow.steps.len());

    for (i, step) in workflow.steps.iter().enumerate() {
        println!(
            "   {}. {} (agent: {}, action: {})",
            i + 1,
            step.id,
            step.agent_id,
            step.action
        );
    }
    println!("   Execution order: {}", order.join(" → "));

    Ok(())
}
