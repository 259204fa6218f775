//! Skill format validation (§4.7 step 0): parses `SKILL.md` front-matter
//! and records errors/warnings without ever hard-rejecting the upload.

use serde::Deserialize;
use serde::Serialize;
use tokio::fs;

const FRONT_MATTER_DELIM: &str = "---";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FormatReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Option<SkillMetadata>,
}

pub struct FormatValidator;

impl FormatValidator {
    /// Reads `{skill_path}/SKILL.md`, parses its YAML front-matter, and
    /// checks for a `scripts/` directory. A missing `scripts/` directory
    /// is a warning, never an error: format errors are recorded on the
    /// skill row but do not block ingestion (§4.7 step 0).
    pub async fn validate(&self, skill_path: &str) -> FormatReport {
        let skill_md_path = format!("{skill_path}/SKILL.md");
        let content = match fs::read_to_string(&skill_md_path).await {
            Ok(content) => content,
            Err(_) => {
                return FormatReport {
                    valid: false,
                    errors: vec!["Missing SKILL.md".to_string()],
                    warnings: vec![],
                    metadata: None,
                };
            }
        };

        if content.trim().is_empty() {
            return FormatReport {
                valid: false,
                errors: vec!["SKILL.md is empty".to_string()],
                warnings: vec![],
                metadata: None,
            };
        }

        let mut errors = Vec::new();
        let metadata = match parse_front_matter(&content) {
            Ok(metadata) => Some(metadata),
            Err(message) => {
                errors.push(message);
                None
            }
        };

        if let Some(metadata) = &metadata {
            if metadata.name.trim().is_empty() {
                errors.push("Missing required field: name".to_string());
            }
            if metadata.description.trim().is_empty() {
                errors.push("Missing required field: description".to_string());
            }
        }

        let mut warnings = Vec::new();
        if fs::metadata(format!("{skill_path}/scripts")).await.is_err() {
            warnings.push("No scripts/ directory (optional)".to_string());
        }

        FormatReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            metadata,
        }
    }
}

/// Extracts the `---`-delimited YAML block at the top of a `SKILL.md`
/// file and parses it into [`SkillMetadata`].
fn parse_front_matter(content: &str) -> Result<SkillMetadata, String> {
    let rest = content
        .strip_prefix(FRONT_MATTER_DELIM)
        .ok_or_else(|| "Invalid frontmatter format or missing name/description".to_string())?;
    let end = rest
        .find(FRONT_MATTER_DELIM)
        .ok_or_else(|| "Invalid frontmatter format or missing name/description".to_string())?;
    let yaml = &rest[..end];
    serde_yaml::from_str::<SkillMetadata>(yaml)
        .map_err(|_| "Invalid frontmatter format or missing name/description".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::fs;

    async fn write_skill_md(dir: &std::path::Path, content: &str) {
        fs::write(dir.join("SKILL.md"), content).await.unwrap();
    }

    #[tokio::test]
    async fn missing_skill_md_is_an_error() {
        let dir = tempdir().unwrap();
        let report = FormatValidator.validate(dir.path().to_str().unwrap()).await;
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Missing SKILL.md".to_string()]);
    }

    #[tokio::test]
    async fn valid_front_matter_without_scripts_dir_warns_but_passes() {
        let dir = tempdir().unwrap();
        write_skill_md(
            dir.path(),
            "---\nname: echo-helper\ndescription: Echoes input back\n---\n\nBody text.\n",
        )
        .await;
        let report = FormatValidator.validate(dir.path().to_str().unwrap()).await;
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings, vec!["No scripts/ directory (optional)".to_string()]);
        assert_eq!(report.metadata.unwrap().name, "echo-helper");
    }

    #[tokio::test]
    async fn scripts_dir_present_suppresses_the_warning() {
        let dir = tempdir().unwrap();
        write_skill_md(
            dir.path(),
            "---\nname: echo-helper\ndescription: Echoes input back\n---\n",
        )
        .await;
        fs::create_dir(dir.path().join("scripts")).await.unwrap();
        let report = FormatValidator.validate(dir.path().to_str().unwrap()).await;
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_required_field_is_an_error_but_skill_is_still_ingested() {
        let dir = tempdir().unwrap();
        write_skill_md(dir.path(), "---\nname: echo-helper\n---\n").await;
        let report = FormatValidator.validate(dir.path().to_str().unwrap()).await;
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Missing required field: description".to_string()]);
        // Format errors never block ingestion: metadata is still returned.
        assert!(report.metadata.is_some());
    }
}
