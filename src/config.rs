//! Configuration Loader
//! - Reads `zbr.toml` for reporting settings
//! - Applies `REPORTING_*` environment overrides (env always wins)
//! - Provides CLI argument parsing with clap

use crate::api::{
    Milestone, NotificationTarget, Notifications, TcmConfigRequest, TestRailSync, XraySync,
    ZebrunnerSync, ZephyrSync,
};
use crate::error::{AgentError, AgentResult};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "zbr.toml";
pub const DEFAULT_PROJECT_KEY: &str = "DEF";
pub const DEFAULT_FRAMEWORK: &str = "playwright";
pub const DEFAULT_DISPLAY_NAME: &str = "Unnamed run";

// =============================================================================
// CLI Configuration
// =============================================================================

/// zbr-agent - test run reporting agent
#[derive(Parser)]
#[command(name = "zbr-agent", version, about = "Test run reporting agent")]
pub struct Cli {
    /// Path to the TOML config file (also: REPORTING_CONFIG env var)
    #[arg(long, short = 'c', env = "REPORTING_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Report runner callbacks read as NDJSON events from stdin
    Report,
    /// Write one side-channel event to stdout (for use inside a test)
    Emit {
        #[command(subcommand)]
        event: EmitCommand,
    },
}

/// Side-channel events that can be emitted from the command line
#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum EmitCommand {
    /// Attach a label to the current test
    TestLabel { key: String, values: Vec<String> },
    /// Attach a label to the whole run
    RunLabel { key: String, values: Vec<String> },
    /// Attach a named link to the current test
    TestArtifactReference { name: String, value: String },
    /// Attach a named link to the whole run
    RunArtifactReference { name: String, value: String },
    /// Upload a file for the current test
    TestArtifact {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Upload a file for the whole run
    RunArtifact {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Upload a screenshot for the current test
    Screenshot { path: PathBuf },
    /// Set the maintainer of the current test
    Maintainer { maintainer: String },
    /// Send a log line for the current test
    Log {
        #[arg(long, default_value = "INFO")]
        level: String,
        message: String,
    },
    /// Link the current test to TCM cases
    TestCase {
        tcm_type: String,
        case_ids: Vec<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete the current test's registration instead of reporting it
    Revert,
}

// =============================================================================
// File Configuration
// =============================================================================

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct FileConfig {
    enabled: Option<bool>,
    project_key: Option<String>,
    server: ServerSection,
    run: RunSection,
    milestone: MilestoneSection,
    notifications: NotificationSection,
    logs: LogsSection,
    video: VideoSection,
    tcm: TcmSection,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct ServerSection {
    hostname: Option<String>,
    access_token: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct RunSection {
    display_name: Option<String>,
    build: Option<String>,
    environment: Option<String>,
    context: Option<String>,
    treat_skips_as_failures: Option<bool>,
    framework: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct MilestoneSection {
    id: Option<i64>,
    name: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct NotificationSection {
    notify_on_each_failure: Option<bool>,
    slack_channels: Vec<String>,
    ms_teams_channels: Vec<String>,
    emails: Vec<String>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct LogsSection {
    capture_stdout: Option<bool>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct VideoSection {
    transcode: Option<bool>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct TcmSection {
    zebrunner: ZebrunnerSync,
    test_rail: TestRailSync,
    xray: XraySync,
    zephyr: ZephyrSync,
}

impl FileConfig {
    pub fn parse(contents: &str) -> AgentResult<Self> {
        toml::from_str(contents).map_err(|e| AgentError::config(format!("invalid TOML: {}", e)))
    }

    /// Read the config file; a missing file yields an empty config.
    pub fn read(path: &Path) -> AgentResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using env and defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Immutable, validated reporting settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub hostname: String,
    pub access_token: String,
    pub project_key: String,
    pub display_name: String,
    pub build: Option<String>,
    pub environment: Option<String>,
    /// Opaque previous-run context; present only for reruns.
    pub run_context: Option<String>,
    pub treat_skips_as_failures: bool,
    pub framework: String,
    pub milestone: Option<Milestone>,
    pub notify_on_each_failure: bool,
    pub slack_channels: Vec<String>,
    pub ms_teams_channels: Vec<String>,
    pub emails: Vec<String>,
    pub capture_stdout: bool,
    pub transcode_video: bool,
    pub tcm: TcmConfigRequest,
}

/// Environment lookup, injectable so resolution is testable without
/// touching the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_string(env: &dyn EnvSource, key: &str) -> Option<String> {
    non_blank(env.get(key))
}

fn env_bool(env: &dyn EnvSource, key: &str) -> AgentResult<Option<bool>> {
    match env_string(env, key) {
        None => Ok(None),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(AgentError::config(format!(
                "{} must be a boolean, got '{}'",
                key, v
            ))),
        },
    }
}

fn env_list(env: &dyn EnvSource, key: &str) -> Option<Vec<String>> {
    env_string(env, key).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| non_blank(Some(v)))
        .collect()
}

impl ReportingConfig {
    /// Load from a config file plus the process environment.
    pub fn load(path: &Path) -> AgentResult<Self> {
        Self::resolve(FileConfig::read(path)?, &ProcessEnv)
    }

    /// Merge file values with env overrides and validate.
    pub fn resolve(file: FileConfig, env: &dyn EnvSource) -> AgentResult<Self> {
        let enabled = env_bool(env, "REPORTING_ENABLED")?
            .or(file.enabled)
            .unwrap_or(false);
        let hostname = env_string(env, "REPORTING_SERVER_HOSTNAME")
            .or(non_blank(file.server.hostname))
            .unwrap_or_default();
        let access_token = env_string(env, "REPORTING_SERVER_ACCESS_TOKEN")
            .or(non_blank(file.server.access_token))
            .unwrap_or_default();

        if enabled && hostname.is_empty() {
            return Err(AgentError::config(
                "server hostname is required when reporting is enabled",
            ));
        }
        if enabled && access_token.is_empty() {
            return Err(AgentError::config(
                "server access token is required when reporting is enabled",
            ));
        }

        let milestone = Self::resolve_milestone(&file.milestone, env)?;

        let tcm = Self::resolve_tcm(file.tcm, env)?;

        Ok(Self {
            enabled,
            hostname: hostname.trim_end_matches('/').to_string(),
            access_token,
            project_key: env_string(env, "REPORTING_PROJECT_KEY")
                .or(non_blank(file.project_key))
                .unwrap_or_else(|| DEFAULT_PROJECT_KEY.to_string()),
            display_name: env_string(env, "REPORTING_RUN_DISPLAY_NAME")
                .or(non_blank(file.run.display_name))
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            build: env_string(env, "REPORTING_RUN_BUILD").or(non_blank(file.run.build)),
            environment: env_string(env, "REPORTING_RUN_ENVIRONMENT")
                .or(non_blank(file.run.environment)),
            run_context: env_string(env, "REPORTING_RUN_CONTEXT").or(non_blank(file.run.context)),
            treat_skips_as_failures: env_bool(env, "REPORTING_RUN_TREAT_SKIPS_AS_FAILURES")?
                .or(file.run.treat_skips_as_failures)
                .unwrap_or(true),
            framework: non_blank(file.run.framework)
                .unwrap_or_else(|| DEFAULT_FRAMEWORK.to_string()),
            milestone,
            notify_on_each_failure: env_bool(env, "REPORTING_NOTIFICATION_NOTIFY_ON_EACH_FAILURE")?
                .or(file.notifications.notify_on_each_failure)
                .unwrap_or(false),
            slack_channels: env_list(env, "REPORTING_NOTIFICATION_SLACK_CHANNELS")
                .unwrap_or_else(|| clean_list(file.notifications.slack_channels)),
            ms_teams_channels: env_list(env, "REPORTING_NOTIFICATION_MS_TEAMS_CHANNELS")
                .unwrap_or_else(|| clean_list(file.notifications.ms_teams_channels)),
            emails: env_list(env, "REPORTING_NOTIFICATION_EMAILS")
                .unwrap_or_else(|| clean_list(file.notifications.emails)),
            capture_stdout: env_bool(env, "REPORTING_LOGS_CAPTURE_STDOUT")?
                .or(file.logs.capture_stdout)
                .unwrap_or(true),
            transcode_video: env_bool(env, "REPORTING_VIDEO_TRANSCODE")?
                .or(file.video.transcode)
                .unwrap_or(true),
            tcm,
        })
    }

    /// env id > env name > file id > file name.
    fn resolve_milestone(
        file: &MilestoneSection,
        env: &dyn EnvSource,
    ) -> AgentResult<Option<Milestone>> {
        if let Some(raw) = env_string(env, "REPORTING_MILESTONE_ID") {
            let id = raw.parse::<i64>().map_err(|_| {
                AgentError::config(format!("REPORTING_MILESTONE_ID must be a number, got '{}'", raw))
            })?;
            return Ok(Some(Milestone {
                id: Some(id),
                name: None,
            }));
        }
        if let Some(name) = env_string(env, "REPORTING_MILESTONE_NAME") {
            return Ok(Some(Milestone {
                id: None,
                name: Some(name),
            }));
        }
        if let Some(id) = file.id {
            return Ok(Some(Milestone {
                id: Some(id),
                name: None,
            }));
        }
        Ok(non_blank(file.name.clone()).map(|name| Milestone {
            id: None,
            name: Some(name),
        }))
    }

    fn resolve_tcm(file: TcmSection, env: &dyn EnvSource) -> AgentResult<TcmConfigRequest> {
        let zebrunner = ZebrunnerSync {
            test_run_id: env_string(env, "REPORTING_TCM_ZEBRUNNER_TEST_RUN_ID")
                .or(non_blank(file.zebrunner.test_run_id)),
            sync_enabled: env_bool(env, "REPORTING_TCM_ZEBRUNNER_SYNC_ENABLED")?
                .or(file.zebrunner.sync_enabled),
        };
        let test_rail = TestRailSync {
            suite_id: env_string(env, "REPORTING_TCM_TEST_RAIL_SUITE_ID")
                .or(non_blank(file.test_rail.suite_id)),
            run_id: env_string(env, "REPORTING_TCM_TEST_RAIL_RUN_ID")
                .or(non_blank(file.test_rail.run_id)),
            run_name: env_string(env, "REPORTING_TCM_TEST_RAIL_RUN_NAME")
                .or(non_blank(file.test_rail.run_name)),
            milestone_name: env_string(env, "REPORTING_TCM_TEST_RAIL_MILESTONE_NAME")
                .or(non_blank(file.test_rail.milestone_name)),
            assignee: env_string(env, "REPORTING_TCM_TEST_RAIL_ASSIGNEE")
                .or(non_blank(file.test_rail.assignee)),
            include_all_test_cases: env_bool(env, "REPORTING_TCM_TEST_RAIL_INCLUDE_ALL_TEST_CASES")?
                .or(file.test_rail.include_all_test_cases),
            sync_enabled: env_bool(env, "REPORTING_TCM_TEST_RAIL_SYNC_ENABLED")?
                .or(file.test_rail.sync_enabled),
        };
        let xray = XraySync {
            execution_key: env_string(env, "REPORTING_TCM_XRAY_EXECUTION_KEY")
                .or(non_blank(file.xray.execution_key)),
            sync_enabled: env_bool(env, "REPORTING_TCM_XRAY_SYNC_ENABLED")?
                .or(file.xray.sync_enabled),
        };
        let zephyr = ZephyrSync {
            test_cycle_key: env_string(env, "REPORTING_TCM_ZEPHYR_TEST_CYCLE_KEY")
                .or(non_blank(file.zephyr.test_cycle_key)),
            jira_project_key: env_string(env, "REPORTING_TCM_ZEPHYR_JIRA_PROJECT_KEY")
                .or(non_blank(file.zephyr.jira_project_key)),
            sync_enabled: env_bool(env, "REPORTING_TCM_ZEPHYR_SYNC_ENABLED")?
                .or(file.zephyr.sync_enabled),
        };
        Ok(TcmConfigRequest {
            zebrunner,
            test_rail,
            xray,
            zephyr,
        })
    }

    /// The TCM sync request, or `None` when no setting carries a value.
    pub fn tcm_request(&self) -> Option<TcmConfigRequest> {
        let t = &self.tcm;
        let any_value_present = t.zebrunner != ZebrunnerSync::default()
            || t.test_rail != TestRailSync::default()
            || t.xray != XraySync::default()
            || t.zephyr != ZephyrSync::default();
        any_value_present.then(|| self.tcm.clone())
    }

    pub fn notifications(&self) -> Option<Notifications> {
        let mut targets = Vec::new();
        for (kind, values) in [
            ("SLACK_CHANNELS", &self.slack_channels),
            ("MS_TEAMS_CHANNELS", &self.ms_teams_channels),
            ("EMAIL_RECIPIENTS", &self.emails),
        ] {
            if !values.is_empty() {
                targets.push(NotificationTarget {
                    kind: kind.to_string(),
                    value: values.join(","),
                });
            }
        }
        if targets.is_empty() && !self.notify_on_each_failure {
            return None;
        }
        Some(Notifications {
            notify_on_each_failure: self.notify_on_each_failure,
            targets,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const ENABLED_FILE: &str = r#"
enabled = true
project_key = "WEB"

[server]
hostname = "https://demo.example.com/"
access_token = "file-token"

[run]
display_name = "Nightly"
environment = "staging"

[milestone]
id = 7
name = "file-milestone"
"#;

    #[test]
    fn test_parse_file_config() {
        let file = FileConfig::parse(ENABLED_FILE).unwrap();
        let config = ReportingConfig::resolve(file, &env_of(&[])).unwrap();
        assert!(config.enabled);
        assert_eq!(config.hostname, "https://demo.example.com");
        assert_eq!(config.project_key, "WEB");
        assert_eq!(config.display_name, "Nightly");
        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert!(config.capture_stdout);
        assert_eq!(
            config.milestone,
            Some(Milestone {
                id: Some(7),
                name: None
            })
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig::parse(ENABLED_FILE).unwrap();
        let env = env_of(&[
            ("REPORTING_PROJECT_KEY", "API"),
            ("REPORTING_SERVER_ACCESS_TOKEN", "env-token"),
            ("REPORTING_RUN_DISPLAY_NAME", "  "),
        ]);
        let config = ReportingConfig::resolve(file, &env).unwrap();
        assert_eq!(config.project_key, "API");
        assert_eq!(config.access_token, "env-token");
        // Blank env values do not override
        assert_eq!(config.display_name, "Nightly");
    }

    #[test]
    fn test_milestone_precedence() {
        let file = FileConfig::parse(ENABLED_FILE).unwrap();
        let env = env_of(&[("REPORTING_MILESTONE_NAME", "env-name")]);
        let config = ReportingConfig::resolve(file, &env).unwrap();
        assert_eq!(config.milestone.unwrap().name.as_deref(), Some("env-name"));

        let file = FileConfig::parse(ENABLED_FILE).unwrap();
        let env = env_of(&[
            ("REPORTING_MILESTONE_NAME", "env-name"),
            ("REPORTING_MILESTONE_ID", "42"),
        ]);
        let config = ReportingConfig::resolve(file, &env).unwrap();
        assert_eq!(config.milestone.unwrap().id, Some(42));

        let file = FileConfig::parse("[milestone]\nname = \"only-name\"").unwrap();
        let config = ReportingConfig::resolve(file, &env_of(&[])).unwrap();
        assert_eq!(config.milestone.unwrap().name.as_deref(), Some("only-name"));
    }

    #[test]
    fn test_enabled_requires_hostname_and_token() {
        let env = env_of(&[("REPORTING_ENABLED", "true")]);
        let err = ReportingConfig::resolve(FileConfig::default(), &env).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));

        let env = env_of(&[
            ("REPORTING_ENABLED", "true"),
            ("REPORTING_SERVER_HOSTNAME", "https://x"),
        ]);
        let err = ReportingConfig::resolve(FileConfig::default(), &env).unwrap_err();
        assert!(err.to_string().contains("access token"));
    }

    #[test]
    fn test_disabled_needs_nothing() {
        let config = ReportingConfig::resolve(FileConfig::default(), &env_of(&[])).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.project_key, DEFAULT_PROJECT_KEY);
    }

    #[test]
    fn test_bad_boolean_is_error() {
        let env = env_of(&[("REPORTING_ENABLED", "maybe")]);
        assert!(ReportingConfig::resolve(FileConfig::default(), &env).is_err());
    }

    #[test]
    fn test_tcm_request_absent_when_nothing_set() {
        let config = ReportingConfig::resolve(FileConfig::default(), &env_of(&[])).unwrap();
        assert!(config.tcm_request().is_none());

        let env = env_of(&[("REPORTING_TCM_XRAY_EXECUTION_KEY", "QA-100")]);
        let config = ReportingConfig::resolve(FileConfig::default(), &env).unwrap();
        let request = config.tcm_request().expect("xray key set");
        assert_eq!(request.xray.execution_key.as_deref(), Some("QA-100"));
        assert!(request.test_rail.suite_id.is_none());
    }

    #[test]
    fn test_tcm_from_file_section() {
        let file = FileConfig::parse(
            r#"
[tcm.test_rail]
suite_id = "S12"
milestone_name = "Sprint 4"
include_all_test_cases = true
"#,
        )
        .unwrap();
        let config = ReportingConfig::resolve(file, &env_of(&[])).unwrap();
        let request = config.tcm_request().unwrap();
        assert_eq!(request.test_rail.suite_id.as_deref(), Some("S12"));
        assert_eq!(request.test_rail.milestone_name.as_deref(), Some("Sprint 4"));
        assert_eq!(request.test_rail.include_all_test_cases, Some(true));

        let env = env_of(&[("REPORTING_TCM_TEST_RAIL_MILESTONE_NAME", "Sprint 5")]);
        let config = ReportingConfig::resolve(FileConfig::default(), &env).unwrap();
        let request = config.tcm_request().unwrap();
        assert_eq!(request.test_rail.milestone_name.as_deref(), Some("Sprint 5"));
    }

    #[test]
    fn test_notification_lists_from_env() {
        let env = env_of(&[("REPORTING_NOTIFICATION_SLACK_CHANNELS", "qa, ,dev")]);
        let config = ReportingConfig::resolve(FileConfig::default(), &env).unwrap();
        let notifications = config.notifications().unwrap();
        assert_eq!(notifications.targets.len(), 1);
        assert_eq!(notifications.targets[0].kind, "SLACK_CHANNELS");
        assert_eq!(notifications.targets[0].value, "qa,dev");

        let config = ReportingConfig::resolve(FileConfig::default(), &env_of(&[])).unwrap();
        assert!(config.notifications().is_none());
    }

    #[test]
    fn test_read_missing_file_is_empty_config() {
        let temp_dir = TempDir::new().unwrap();
        let file = FileConfig::read(&temp_dir.path().join("zbr.toml")).unwrap();
        assert!(file.enabled.is_none());
    }

    #[test]
    fn test_read_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zbr.toml");
        std::fs::write(&path, "enabled = [").unwrap();
        assert!(matches!(
            FileConfig::read(&path),
            Err(AgentError::Config { .. })
        ));
    }
}
