//! The fixed video-conversion workflow

use serde::{Deserialize, Serialize};

/// Where the converter lives and how to drive it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub converter_url: String,
    pub input_selector: String,
    pub submit_selector: String,
    pub completion_selector: String,
    pub completion_timeout_ms: u64,
    /// Also screenshot the page when a step fails
    pub capture_failure_evidence: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            converter_url: "https://video-converter.com".to_string(),
            input_selector: "input#video-url".to_string(),
            submit_selector: "button#convert".to_string(),
            completion_selector: "div#download-link".to_string(),
            completion_timeout_ms: 30_000,
            capture_failure_evidence: false,
        }
    }
}

/// A browser action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Navigate {
        url: String,
    },
    /// Fill an input, then click the control that submits it
    Submit {
        input_selector: String,
        value: String,
        button_selector: String,
    },
    WaitFor {
        selector: String,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub name: String,
    pub action: StepAction,
}

/// Steps of one conversion attempt for `target`, in execution order
pub fn conversion_steps(config: &WorkflowConfig, target: &str) -> Vec<WorkflowStep> {
    vec![
        WorkflowStep {
            name: "Navigate to converter".to_string(),
            action: StepAction::Navigate {
                url: config.converter_url.clone(),
            },
        },
        WorkflowStep {
            name: "Input video URL".to_string(),
            action: StepAction::Submit {
                input_selector: config.input_selector.clone(),
                value: target.to_string(),
                button_selector: config.submit_selector.clone(),
            },
        },
        WorkflowStep {
            name: "Attempt conversion".to_string(),
            action: StepAction::WaitFor {
                selector: config.completion_selector.clone(),
                timeout_ms: config.completion_timeout_ms,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_steps_order_and_target() {
        let steps = conversion_steps(&WorkflowConfig::default(), "https://example.com/video");

        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Navigate to converter", "Input video URL", "Attempt conversion"]);

        assert_eq!(
            steps[1].action,
            StepAction::Submit {
                input_selector: "input#video-url".to_string(),
                value: "https://example.com/video".to_string(),
                button_selector: "button#convert".to_string(),
            }
        );
        assert_eq!(
            steps[2].action,
            StepAction::WaitFor {
                selector: "div#download-link".to_string(),
                timeout_ms: 30_000,
            }
        );
    }
}
