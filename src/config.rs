use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CONFIG_FILE: &str = "rosterd.json";

/// Workspace configuration. Everything has a default so a fresh workspace
/// works without a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// School holidays as `YYYY-MM-DD` strings.
    pub holidays: Vec<String>,
    /// Static reminder recipient list; selection never changes who gets mail.
    pub reminder_recipients: Vec<String>,
    /// Teacher display name to email, for staff lookups by the client.
    pub teacher_emails: BTreeMap<String, String>,
    /// Course title that marks a schedule row as a case-manager assignment.
    pub case_manager_course: String,
    pub milestone_workdays: u32,
    pub due_date_workdays: u32,
    pub reminder_subject: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            holidays: Vec::new(),
            reminder_recipients: Vec::new(),
            teacher_emails: BTreeMap::new(),
            case_manager_course: "Case Management".to_string(),
            milestone_workdays: 10,
            due_date_workdays: 2,
            reminder_subject: "10-Day Transition Feedback Reminder".to_string(),
        }
    }
}

pub fn load(workspace: &Path) -> anyhow::Result<Config> {
    let path = workspace.join(CONFIG_FILE);
    if !path.is_file() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let cfg: Config = serde_json::from_str(&text)
        .with_context(|| format!("invalid config {}", path.to_string_lossy()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_missing_file() {
        let dir = std::env::temp_dir().join("rosterd-config-missing");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let cfg = load(&dir).expect("load");
        assert_eq!(cfg.milestone_workdays, 10);
        assert_eq!(cfg.due_date_workdays, 2);
        assert!(cfg.holidays.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = std::env::temp_dir().join(format!(
            "rosterd-config-partial-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(
            dir.join(CONFIG_FILE),
            r#"{ "holidays": ["2025-09-01"], "reminderRecipients": ["staff@example.org"] }"#,
        )
        .expect("write config");
        let cfg = load(&dir).expect("load");
        assert_eq!(cfg.holidays, vec!["2025-09-01".to_string()]);
        assert_eq!(cfg.reminder_recipients, vec!["staff@example.org".to_string()]);
        assert_eq!(cfg.milestone_workdays, 10);
    }
}
