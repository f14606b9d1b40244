//! End-to-end demo: the four-capability incident pipeline running against
//! in-process stub services.
//!
//! ```bash
//! cargo run --bin triage-demo
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use triage_core::config::TriageConfig;
use triage_core::logging::init_structured_logging;
use triage_core::models::{CaseType, StepPhase, StepSpec, WorkflowDefinition};
use triage_core::orchestration::{CaseSubmission, OrchestrationSystem};
use triage_core::registry::{CapabilityHandler, HandlerResult};

struct StubService {
    name: &'static str,
}

#[async_trait]
impl CapabilityHandler for StubService {
    async fn invoke(&self, _payload: &Value) -> HandlerResult {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({"status": "success", "service": self.name}))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_structured_logging();

    let config = TriageConfig::from_env()?;
    let system = OrchestrationSystem::build(&config);

    for capability in [
        "incident-investigate",
        "spam-classify",
        "compliance-validate",
        "audit-record",
    ] {
        system.register_capability(capability, Arc::new(StubService { name: capability }));
    }

    system.register_definition(
        CaseType::SpamIncident,
        WorkflowDefinition::new("spam-pipeline", "1.0.0")
            .step(StepSpec::new("investigate", "incident-investigate"))
            .step(StepSpec::new("classify", "spam-classify").depends_on(&["investigate"]))
            .step(
                StepSpec::new("validate", "compliance-validate")
                    .depends_on(&["classify"])
                    .phase(StepPhase::Validate),
            )
            .step(
                StepSpec::new("record", "audit-record")
                    .depends_on(&["validate"])
                    .phase(StepPhase::Remediate),
            )
            .required_payload_fields(&["account", "content"]),
    )?;

    system.start();

    let receipt = system
        .submit(CaseSubmission::new(
            CaseType::SpamIncident,
            json!({"account": "acct-42", "content": "one weird trick"}),
        ))
        .await?;
    println!(
        "submitted case {} as instance {}",
        receipt.case_id, receipt.instance_id
    );

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = system.status(receipt.instance_id).await?;
        if status.current_state.is_terminal() {
            println!(
                "case finished in state {}:\n{}",
                status.current_state,
                serde_json::to_string_pretty(&status)?
            );
            break;
        }
    }

    system.shutdown().await;
    Ok(())
}
