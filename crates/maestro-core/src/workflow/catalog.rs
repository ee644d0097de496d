//! Named workflow catalog: built-in templates plus YAML definitions.

use std::collections::BTreeMap;
use std::path::Path;

use super::schema::{StepTemplate, WorkflowDefinition};
use crate::error::ServerError;

pub const BALANCE_AGENT: &str = "balance-agent";
pub const NEGOTIATION_AGENT: &str = "negotiation-agent";
pub const PAYMENT_AGENT: &str = "payment-agent";

/// Definitions callers can select by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    definitions: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with [`WorkflowCatalog::builtin_definitions`].
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for definition in Self::builtin_definitions() {
            catalog.definitions.insert(definition.name.clone(), definition);
        }
        catalog
    }

    /// Validate and add a definition, replacing any with the same name.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), ServerError> {
        definition.validate()?;
        tracing::info!(
            "[WorkflowCatalog] Registered workflow '{}' ({} steps)",
            definition.name,
            definition.steps.len()
        );
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Load every `.yaml`/`.yml` definition in `dir`. Invalid files are
    /// skipped with a warning; the count of loaded definitions is returned.
    pub fn load_dir(&mut self, dir: &str) -> Result<usize, String> {
        let dir_path = Path::new(dir);
        if !dir_path.is_dir() {
            return Err(format!("Workflow directory '{}' does not exist", dir));
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir_path)
            .map_err(|e| format!("Failed to read directory '{}': {}", dir, e))?
        {
            let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }

            match WorkflowDefinition::from_file(path.to_str().unwrap_or("")) {
                Ok(definition) => {
                    tracing::info!(
                        "[WorkflowCatalog] Loaded workflow '{}' from {}",
                        definition.name,
                        path.display()
                    );
                    self.definitions.insert(definition.name.clone(), definition);
                    count += 1;
                }
                Err(e) => {
                    tracing::warn!("[WorkflowCatalog] Skipping {}: {}", path.display(), e);
                }
            }
        }

        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// All definitions, sorted by name.
    pub fn list(&self) -> Vec<WorkflowDefinition> {
        self.definitions.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    /// Built-in workflows (hardcoded, no files needed).
    pub fn builtin_definitions() -> Vec<WorkflowDefinition> {
        vec![
            WorkflowDefinition::new(
                "resource-purchase",
                "Check the wallet balance and discover offers, then pay for the best one",
            )
            .step(balance_step())
            .step(offers_step())
            .step(
                StepTemplate::new("payment", PAYMENT_AGENT, "execute_payment")
                    .input(
                        "Pay for the best offer for ${context.resource} from wallet ${context.wallet}.\n\
                         Available balance: ${steps.balance.output}\n\
                         Offers: ${steps.offers.output}",
                    )
                    .reads(["resource", "wallet"])
                    .depends_on(["balance", "offers"])
                    .output_key("receipt"),
            ),
            WorkflowDefinition::new("balance-inquiry", "Report the balance of a wallet")
                .step(balance_step()),
            WorkflowDefinition::new(
                "negotiated-purchase",
                "Discover offers, negotiate within a budget, then pay the agreed price",
            )
            .step(balance_step())
            .step(offers_step())
            .step(
                StepTemplate::new("negotiate", NEGOTIATION_AGENT, "negotiate")
                    .input(
                        "Negotiate the best price for ${context.resource} within a budget of ${context.budget}.\n\
                         Offers: ${steps.offers.output}",
                    )
                    .reads(["resource", "budget"])
                    .depends_on(["offers"])
                    .output_key("agreement"),
            )
            .step(
                StepTemplate::new("payment", PAYMENT_AGENT, "execute_payment")
                    .input(
                        "Pay the agreed price from wallet ${context.wallet}.\n\
                         Agreement: ${steps.negotiate.output}\n\
                         Available balance: ${steps.balance.output}",
                    )
                    .reads(["wallet"])
                    .depends_on(["balance", "negotiate"])
                    .output_key("receipt"),
            ),
        ]
    }
}

fn balance_step() -> StepTemplate {
    StepTemplate::new("balance", BALANCE_AGENT, "check_balance")
        .input("Report the available balance of wallet ${context.wallet}.")
        .reads(["wallet"])
        .output_key("balance")
}

fn offers_step() -> StepTemplate {
    StepTemplate::new("offers", NEGOTIATION_AGENT, "discover_offers")
        .input("Find current offers for ${context.resource}.")
        .reads(["resource"])
}
