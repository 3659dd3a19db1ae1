//! End-of-run summary table.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use orbit_deploy::ProvisioningResult;

pub fn render(result: &ProvisioningResult) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Item", "Value"]);

    let status = if result.succeeded() { "done" } else { "failed" };
    table.add_row(vec!["Status".to_string(), status.to_string()]);
    table.add_row(vec!["Stage".to_string(), result.stage_reached.to_string()]);
    table.add_row(vec!["Exit code".to_string(), result.exit_code().to_string()]);

    if let Some(request) = &result.request {
        table.add_row(vec![
            "Process type".to_string(),
            request.process_type.to_string(),
        ]);
    }

    if let Some(error) = &result.error {
        table.add_row(vec!["Error".to_string(), error.to_string()]);
    }

    for path in &result.env_files {
        table.add_row(vec!["Env file".to_string(), path.display().to_string()]);
    }

    for service in &result.services {
        let state = if service.reused { "reused" } else { "started" };
        table.add_row(vec![
            service.service.clone(),
            format!("{} ({state})", service.container_name),
        ]);
    }

    if let Some(agent) = &result.agent {
        let id = agent.id.as_deref().unwrap_or("-");
        let name = agent.name.as_deref().unwrap_or("-");
        table.add_row(vec!["Agent".to_string(), format!("{name} [{id}]")]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_deploy::{AgentRecord, ServiceHandler, Stage, ValidationError};

    #[test]
    fn test_render_success() {
        let result = ProvisioningResult {
            stage_reached: Stage::Done,
            services: vec![ServiceHandler {
                service: "index-service".to_string(),
                container_id: "abc".to_string(),
                container_name: "orbit-index-service".to_string(),
                reused: true,
            }],
            agent: Some(AgentRecord {
                id: Some("42".to_string()),
                name: Some("sales-agent".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let rendered = render(&result).to_string();
        assert!(rendered.contains("done"));
        assert!(rendered.contains("orbit-index-service (reused)"));
        assert!(rendered.contains("sales-agent [42]"));
    }

    #[test]
    fn test_render_failure() {
        let result = ProvisioningResult {
            error: Some(ValidationError::AmbiguousSource.into()),
            ..Default::default()
        };

        let rendered = render(&result).to_string();
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("VALIDATE"));
        assert!(rendered.contains("ambiguous source"));
    }
}
