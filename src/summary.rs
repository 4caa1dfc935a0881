use std::fmt::Write;

use tracing::warn;

use crate::orchestrator::Orchestrator;

pub const PLACEHOLDER: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub struct StackReport {
    pub name: String,
    pub state: String,
    pub notable: String,
}

/// Final state and notable output of each managed stack. Read-only; anything
/// that cannot be fetched is shown as a placeholder.
pub async fn collect(
    orchestrator: &dyn Orchestrator,
    filter: &str,
    stack_names: &[String],
    notable_output: &str,
) -> Vec<StackReport> {
    let listed = match orchestrator.list_stacks(filter).await {
        Ok(summaries) => Some(summaries),
        Err(error) => {
            warn!(filter, "Unable to list stacks, describing individually: {}", error);
            None
        }
    };

    let mut reports = Vec::new();
    for name in stack_names {
        let state = match &listed {
            Some(summaries) => summaries
                .iter()
                .find(|summary| &summary.name == name)
                .map(|summary| summary.state.to_string())
                .unwrap_or_else(|| "ABSENT".to_string()),
            None => match orchestrator.describe_stack(name).await {
                Ok(state) => state.to_string(),
                Err(_) => PLACEHOLDER.to_string(),
            },
        };

        let notable = match orchestrator.get_outputs(name).await {
            Ok(outputs) => outputs.get(notable_output).unwrap_or(PLACEHOLDER).to_string(),
            Err(_) => PLACEHOLDER.to_string(),
        };

        reports.push(StackReport {
            name: name.clone(),
            state,
            notable,
        });
    }

    return reports;
}

pub fn render(reports: &[StackReport], notable_output: &str) -> String {
    let width = reports.iter().map(|report| report.name.len()).max().unwrap_or(0);
    let mut rendered = String::from("Deployment summary\n");
    for report in reports {
        let _ = writeln!(
            rendered,
            "  {:<width$}  {:<20}  {}: {}",
            report.name,
            report.state,
            notable_output,
            report.notable,
            width = width
        );
    }

    return rendered;
}
