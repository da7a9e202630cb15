//! One-time setup resources pushed into a workload before its first layer.

use handoff_core::WorkloadKind;

const WEBSERVER_SOURCE: &str = include_str!("resources/webserver.py");
const WEBSERVER_DEPENDENCIES: &str = include_str!("resources/webserver-dependencies.txt");

/// Destination of the web front-end's source inside its container.
pub const WEBSERVER_PATH: &str = "/webserver.py";

/// One setup action. Steps are safe to repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    Push { path: String, contents: Vec<u8> },
    Exec { argv: Vec<String> },
}

/// Setup steps for `kind`, in order.
pub fn setup_steps(kind: WorkloadKind) -> Vec<SetupStep> {
    match kind {
        WorkloadKind::KeyValueStore => Vec::new(),
        WorkloadKind::WebFrontend => {
            let mut argv = vec!["pip".to_string(), "install".to_string()];
            argv.extend(webserver_dependencies());
            vec![
                SetupStep::Push {
                    path: WEBSERVER_PATH.to_string(),
                    contents: WEBSERVER_SOURCE.as_bytes().to_vec(),
                },
                SetupStep::Exec { argv },
            ]
        }
    }
}

/// Python packages the web front-end needs; blank lines are skipped.
pub fn webserver_dependencies() -> Vec<String> {
    WEBSERVER_DEPENDENCIES
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
