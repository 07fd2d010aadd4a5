//! Configuration scaffolding for `cooldown-keeper init`.
//!
//! Writes `~/.cooldown-keeper/config.toml` from the bundled template without
//! overwriting an existing file.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct TemplateFile {
    relative_path: &'static str,
    contents: &'static str,
}

const TEMPLATE_FILES: &[TemplateFile] = &[TemplateFile {
    relative_path: "config.toml",
    contents: include_str!("../../config-templates/config.toml"),
}];

pub async fn initialize(config_path: Option<PathBuf>) -> Result<InitReport> {
    let config_path = match config_path {
        Some(path) => path,
        None => crate::config::default_config_path()?,
    };
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", config_path.display()))?
        .to_path_buf();
    initialize_at_root(&root).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    for template in TEMPLATE_FILES {
        let target = root.join(template.relative_path);
        match tokio::fs::metadata(&target).await {
            Ok(_) => {
                report.skipped.push(target);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&target, template.contents)
                    .await
                    .map_err(|e| {
                        anyhow::anyhow!("write config template {}: {e}", target.display())
                    })?;
                report.created.push(target);
            }
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "inspect config path {}: {err}",
                    target.display()
                ));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{TEMPLATE_FILES, initialize_at_root};
    use crate::config::CooldownKeeperConfig;

    #[tokio::test]
    async fn init_creates_template_when_missing() {
        let root = tempfile::tempdir().expect("tempdir");
        let report = initialize_at_root(root.path()).await.expect("init succeeds");

        assert_eq!(report.created.len(), TEMPLATE_FILES.len());
        assert!(report.skipped.is_empty());
        for template in TEMPLATE_FILES {
            let target = root.path().join(template.relative_path);
            assert!(target.exists(), "missing template {}", target.display());
        }
    }

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("config.toml");
        std::fs::write(&target, "# mine").expect("seed");

        let report = initialize_at_root(root.path()).await.expect("init succeeds");
        assert!(report.created.is_empty(), "existing file must be kept");
        assert_eq!(report.skipped.len(), TEMPLATE_FILES.len());
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "# mine");
    }

    #[test]
    fn template_parses_as_config() {
        for template in TEMPLATE_FILES {
            let cfg = CooldownKeeperConfig::from_toml_str(template.contents).expect("template parses");
            assert_eq!(cfg.engine_settings().actions.len(), 3);
        }
    }
}
