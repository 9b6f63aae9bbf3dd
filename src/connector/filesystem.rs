//! Local directory connector.
//!
//! Walks a root directory, keeps files matching the include globs and not
//! matching the exclude globs (plus `.git`, `target` and `node_modules`),
//! and turns each into a [`Document`] whose id is its path relative to the
//! root. The file's mtime is its `modified_at`.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{ConfigField, ConfigFieldKind, SourceConnector};
use crate::config::{FilesystemSourceConfig, PollConfig};
use crate::error::IngestError;
use crate::models::{Document, DocumentKind, FileType};

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct FilesystemConnector {
    name: String,
    config: FilesystemSourceConfig,
}

impl FilesystemConnector {
    pub fn new(name: String, config: FilesystemSourceConfig) -> Self {
        Self { name, config }
    }

    fn globsets(&self) -> Result<(GlobSet, GlobSet)> {
        let include = build_globset(&self.config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(self.config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;
        Ok((include, exclude))
    }
}

#[async_trait]
impl SourceConnector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    fn describe_config(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::new("root", "Root directory", ConfigFieldKind::Text)
                .placeholder("./docs")
                .required(),
            ConfigField::new("include_globs", "Include patterns", ConfigFieldKind::Textarea)
                .placeholder("**/*.md"),
            ConfigField::new("exclude_globs", "Exclude patterns", ConfigFieldKind::Textarea),
            ConfigField::new("follow_symlinks", "Follow symlinks", ConfigFieldKind::Boolean),
        ]
    }

    async fn validate_config(&self) -> Result<(), IngestError> {
        let root = &self.config.root;
        if !root.is_dir() {
            return Err(IngestError::config(format!(
                "source '{}': root is not a directory: {}",
                self.source_id(),
                root.display()
            )));
        }
        self.globsets()
            .map_err(|e| IngestError::config(format!("source '{}': {}", self.source_id(), e)))?;
        Ok(())
    }

    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Document>> {
        let (include, exclude) = self.globsets()?;
        let root = self.config.root.clone();
        let follow_symlinks = self.config.follow_symlinks;
        let source_id = self.source_id();

        tokio::task::spawn_blocking(move || {
            scan(&root, &include, &exclude, follow_symlinks, &source_id, since)
        })
        .await
        .context("filesystem scan task panicked")?
    }

    fn poll_config(&self) -> PollConfig {
        self.config.poll
    }
}

fn scan(
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    follow_symlinks: bool,
    source_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Document>> {
    if !root.exists() {
        anyhow::bail!("filesystem root does not exist: {}", root.display());
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let modified_at = modified_time(path)?;
        if since.is_some_and(|since| modified_at < since) {
            continue;
        }

        match file_to_document(path, &rel_str, source_id, modified_at) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(source = source_id, path = %rel_str, error = %e, "skipping unreadable file"),
        }
    }

    // Oldest first so the queue sees changes in the order they happened.
    docs.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.id.cmp(&b.id)));
    debug!(source = source_id, count = docs.len(), "filesystem scan complete");
    Ok(docs)
}

fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    Ok(DateTime::<Utc>::from(modified))
}

fn file_to_document(
    path: &Path,
    relative_path: &str,
    source_id: &str,
    modified_at: DateTime<Utc>,
) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let location = Path::new(relative_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Document {
        id: relative_path.to_string(),
        source_id: source_id.to_string(),
        kind: DocumentKind::Document,
        file_type: FileType::from_extension(relative_path),
        title,
        content,
        author: String::new(),
        author_image_url: String::new(),
        location,
        url: format!("file://{}", path.display()),
        modified_at,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn connector(root: &Path) -> FilesystemConnector {
        FilesystemConnector::new(
            "docs".to_string(),
            FilesystemSourceConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: vec!["drafts/**".to_string()],
                follow_symlinks: false,
                poll: PollConfig::default(),
            },
        )
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn test_scan_applies_globs_and_builds_documents() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("guides")).unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("guides/setup.md"), "# Setup\n\nInstall it.").unwrap();
        fs::write(tmp.path().join("notes.txt"), "plain notes").unwrap();
        fs::write(tmp.path().join("drafts/wip.md"), "not ready").unwrap();
        fs::write(tmp.path().join(".git/HEAD.md"), "ignored").unwrap();
        fs::write(tmp.path().join("image.png"), "binary-ish").unwrap();

        let docs = connector(tmp.path()).fetch_since(None).await.unwrap();
        let mut ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["guides/setup.md", "notes.txt"]);

        let setup = docs.iter().find(|d| d.id == "guides/setup.md").unwrap();
        assert_eq!(setup.source_id, "filesystem:docs");
        assert_eq!(setup.title, "setup.md");
        assert_eq!(setup.location, "guides");
        assert_eq!(setup.file_type, FileType::Markdown);
        assert!(setup.content.contains("Install it."));
    }

    #[tokio::test]
    async fn test_fetch_since_includes_items_at_watermark() {
        let tmp = TempDir::new().unwrap();
        let old = tmp.path().join("old.md");
        let new = tmp.path().join("new.md");
        fs::write(&old, "old").unwrap();
        fs::write(&new, "new").unwrap();

        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&old, base);
        set_mtime(&new, base + Duration::from_secs(60));

        let connector = connector(tmp.path());
        let watermark = DateTime::<Utc>::from(base + Duration::from_secs(60));
        let docs = connector.fetch_since(Some(watermark)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "new.md");

        // Same watermark again: same result.
        let again = connector.fetch_since(Some(watermark)).await.unwrap();
        assert_eq!(again, docs);

        let all = connector.fetch_since(None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["old.md", "new.md"]);
    }

    #[tokio::test]
    async fn test_validate_config() {
        let tmp = TempDir::new().unwrap();
        connector(tmp.path()).validate_config().await.unwrap();

        let missing = connector(&tmp.path().join("nope"));
        assert!(matches!(
            missing.validate_config().await,
            Err(IngestError::ConfigInvalid(_))
        ));

        let mut bad_glob = connector(tmp.path());
        bad_glob.config.include_globs = vec!["[".to_string()];
        assert!(bad_glob.validate_config().await.is_err());
    }

    #[test]
    fn test_describe_config_lists_root_as_required() {
        let tmp = TempDir::new().unwrap();
        let fields = connector(tmp.path()).describe_config();
        let root = fields.iter().find(|f| f.name == "root").unwrap();
        assert!(root.required);
        assert_eq!(root.kind, ConfigFieldKind::Text);
    }
}
