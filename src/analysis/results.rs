//! Result Documents
//!
//! Per-experiment results and the workspace-level document aggregating
//! them, serializable as JSON, YAML, or human-readable text.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FomRecord {
    pub name: String,
    pub value: String,
    pub units: String,
    pub origin: String,
    pub origin_type: String,
}

/// The figures of merit captured under one context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextFoms {
    pub name: String,
    pub foms: Vec<FomRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentResult {
    pub name: String,
    #[serde(rename = "EXPERIMENT_CHAIN")]
    pub experiment_chain: Vec<String>,
    #[serde(rename = "RAMBLE_STATUS")]
    pub status: ExperimentStatus,
    #[serde(rename = "RAMBLE_VARIABLES", skip_serializing_if = "Option::is_none")]
    pub variables: Option<IndexMap<String, String>>,
    #[serde(rename = "RAMBLE_RAW_VARIABLES", skip_serializing_if = "Option::is_none")]
    pub raw_variables: Option<IndexMap<String, Value>>,
    #[serde(rename = "CONTEXTS", skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<ContextFoms>>,
}

impl ExperimentResult {
    pub fn succeeded(&self) -> bool {
        self.status == ExperimentStatus::Success
    }
}

/// Output format for the aggregated results document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Text,
}

/// The workspace-level results document.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceResults {
    pub workspace_name: String,
    pub date: String,
    pub experiments: Vec<ExperimentResult>,
}

impl WorkspaceResults {
    pub fn new(workspace_name: impl Into<String>, experiments: Vec<ExperimentResult>) -> Self {
        Self {
            workspace_name: workspace_name.into(),
            date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            experiments,
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(self)?),
            OutputFormat::Text => Ok(self.to_text()),
        }
    }

    fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Workspace: {}\n", self.workspace_name));
        out.push_str(&format!("Date: {}\n", self.date));

        for experiment in &self.experiments {
            out.push_str(&format!("Experiment: {}\n", experiment.name));
            let status = match experiment.status {
                ExperimentStatus::Success => "SUCCESS",
                ExperimentStatus::Failed => "FAILED",
            };
            out.push_str(&format!("  Status: {}\n", status));

            if let Some(contexts) = &experiment.contexts {
                for context in contexts {
                    out.push_str(&format!("  {}:\n", context.name));
                    for fom in &context.foms {
                        if fom.units.is_empty() {
                            out.push_str(&format!("    {} = {}\n", fom.name, fom.value));
                        } else {
                            out.push_str(&format!(
                                "    {} = {} {}\n",
                                fom.name, fom.value, fom.units
                            ));
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ExperimentResult {
        ExperimentResult {
            name: "basic.test_wl.series1_4".to_string(),
            experiment_chain: vec!["basic.test_wl.series1_4".to_string()],
            status: ExperimentStatus::Success,
            variables: None,
            raw_variables: None,
            contexts: Some(vec![ContextFoms {
                name: "iter = 3".to_string(),
                foms: vec![FomRecord {
                    name: "rate".to_string(),
                    value: "42.5".to_string(),
                    units: "GF/s".to_string(),
                    origin: "basic".to_string(),
                    origin_type: "application".to_string(),
                }],
            }]),
        }
    }

    #[test]
    fn test_json_keys() {
        let doc = WorkspaceResults::new("test", vec![sample_result()]);
        let json = doc.render(OutputFormat::Json).unwrap();
        assert!(json.contains("\"RAMBLE_STATUS\": \"SUCCESS\""));
        assert!(json.contains("\"EXPERIMENT_CHAIN\""));
        assert!(json.contains("\"CONTEXTS\""));
        // Unset optional sections are omitted entirely.
        assert!(!json.contains("RAMBLE_VARIABLES"));
    }

    #[test]
    fn test_yaml_renders() {
        let doc = WorkspaceResults::new("test", vec![sample_result()]);
        let yaml = doc.render(OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("RAMBLE_STATUS: SUCCESS"));
    }

    #[test]
    fn test_text_renders() {
        let doc = WorkspaceResults::new("test", vec![sample_result()]);
        let text = doc.render(OutputFormat::Text).unwrap();
        assert!(text.contains("Experiment: basic.test_wl.series1_4"));
        assert!(text.contains("  Status: SUCCESS"));
        assert!(text.contains("    rate = 42.5 GF/s"));
    }
}
