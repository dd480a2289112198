//! Project initializer: rewrite template values across a project tree.
//!
//! A new project starts as a copy of the template. Its placeholder values
//! (project name, author, organization, database and warehouse names) are
//! replaced in every text file, and the `ddls/` paths named after them are
//! renamed. [`plan_rewrite`] is a dry run; [`apply_rewrite`] performs it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::Result;

/// Directories never descended into.
pub const SKIP_DIRS: [&str; 7] = [
    ".git",
    "venv",
    "__pycache__",
    "target",
    "dbt_packages",
    "logs",
    ".sqlfluff_cache",
];

/// Extensions treated as binary and never rewritten.
pub const BINARY_EXTENSIONS: [&str; 10] = [
    "csv", "pptx", "xlsx", "png", "jpg", "gif", "ico", "woff", "woff2", "pyc",
];

/// The six values a template carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateValues {
    pub project_name: String,
    pub author_name: String,
    pub organization: String,
    pub app_database: String,
    pub ci_database: String,
    pub warehouse_name: String,
}

impl Default for TemplateValues {
    /// The values shipped in the template itself.
    fn default() -> Self {
        Self {
            project_name: "ci_cd_project".to_string(),
            author_name: "Anouar Zbaida".to_string(),
            organization: "Crithink".to_string(),
            app_database: "APP_DB".to_string(),
            ci_database: "_DB_UTILS".to_string(),
            warehouse_name: "ANALYTICS_WH".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub label: String,
    pub old: String,
    pub new: String,
    /// Occurrences across all text files at planning time.
    pub occurrences: usize,
    /// Files containing at least one occurrence.
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    /// Relative to the project root.
    pub from: PathBuf,
    pub to: PathBuf,
    pub is_dir: bool,
}

impl fmt::Display for Rename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.is_dir { "directory" } else { "file" };
        write!(f, "rename {what}: {} -> {}", self.from.display(), self.to.display())
    }
}

/// Everything an initialization would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewritePlan {
    pub root: PathBuf,
    pub replacements: Vec<Replacement>,
    /// Only renames whose source exists.
    pub renames: Vec<Rename>,
}

impl RewritePlan {
    /// Every value equals its template default.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.renames.is_empty()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .replacements
            .iter()
            .map(|r| {
                format!(
                    "replace '{}' -> '{}' ({} occurrences in {} files)",
                    r.old, r.new, r.occurrences, r.files
                )
            })
            .collect();
        lines.extend(self.renames.iter().map(Rename::to_string));
        lines
    }
}

/// Text files under `root`, skipping ignored directories and binary files.
/// Sorted for stable output.
pub fn collect_text_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                let name = entry.file_name();
                if !SKIP_DIRS.iter().any(|skip| name == *skip) {
                    stack.push(path);
                }
            } else if file_type.is_file() && !is_binary(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Content of a text file, or `None` when it is not valid UTF-8.
fn read_text(path: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8(bytes).ok())
}

fn pairs(values: &TemplateValues) -> Vec<(&'static str, String, String)> {
    let defaults = TemplateValues::default();
    [
        ("project name", defaults.project_name, &values.project_name),
        ("author name", defaults.author_name, &values.author_name),
        ("organization", defaults.organization, &values.organization),
        ("application database", defaults.app_database, &values.app_database),
        ("CI/utilities database", defaults.ci_database, &values.ci_database),
        ("warehouse name", defaults.warehouse_name, &values.warehouse_name),
    ]
    .into_iter()
    .filter(|(_, old, new)| old != *new)
    .map(|(label, old, new)| (label, old, new.clone()))
    .collect()
}

fn candidate_renames(values: &TemplateValues) -> Vec<Rename> {
    let defaults = TemplateValues::default();
    let ddls = Path::new("ddls");
    let account = ddls.join("_account");
    let mut renames = vec![
        Rename {
            from: ddls.join(&defaults.app_database),
            to: ddls.join(&values.app_database),
            is_dir: true,
        },
        Rename {
            from: ddls.join(&defaults.ci_database),
            to: ddls.join(&values.ci_database),
            is_dir: true,
        },
    ];
    for (dir, old, new) in [
        ("databases", &defaults.app_database, &values.app_database),
        ("databases", &defaults.ci_database, &values.ci_database),
        ("warehouses", &defaults.warehouse_name, &values.warehouse_name),
    ] {
        renames.push(Rename {
            from: account.join(dir).join(format!("{old}.sql")),
            to: account.join(dir).join(format!("{new}.sql")),
            is_dir: false,
        });
    }
    renames.retain(|r| r.from != r.to);
    renames
}

/// Dry run: count occurrences and list the renames that would happen.
pub fn plan_rewrite(root: &Path, values: &TemplateValues) -> Result<RewritePlan> {
    let pairs = pairs(values);
    let files = collect_text_files(root)?;
    let mut contents = Vec::with_capacity(files.len());
    for file in &files {
        if let Some(text) = read_text(file)? {
            contents.push(text);
        }
    }

    let replacements = pairs
        .into_iter()
        .map(|(label, old, new)| {
            let (occurrences, files) = contents.iter().fold((0, 0), |(total, files), text| {
                match text.matches(old.as_str()).count() {
                    0 => (total, files),
                    n => (total + n, files + 1),
                }
            });
            Replacement {
                label: label.to_string(),
                old,
                new,
                occurrences,
                files,
            }
        })
        .collect();

    let renames = candidate_renames(values)
        .into_iter()
        .filter(|r| root.join(&r.from).exists())
        .collect();

    Ok(RewritePlan {
        root: root.to_path_buf(),
        replacements,
        renames,
    })
}

/// Apply `plan`: renames first, then content replacement over the renamed
/// tree. Returns the number of replacements made.
pub fn apply_rewrite(plan: &RewritePlan) -> Result<usize> {
    for rename in &plan.renames {
        let from = plan.root.join(&rename.from);
        let to = plan.root.join(&rename.to);
        if !from.exists() {
            continue;
        }
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&from, &to)?;
        info!(from = %rename.from.display(), to = %rename.to.display(), "renamed");
    }

    let files = collect_text_files(&plan.root)?;
    let mut total = 0;
    for file in files {
        let Some(mut text) = read_text(&file)? else {
            continue;
        };
        let mut changed = 0;
        for r in &plan.replacements {
            let n = text.matches(r.old.as_str()).count();
            if n > 0 {
                text = text.replace(&r.old, &r.new);
                changed += n;
            }
        }
        if changed > 0 {
            std::fs::write(&file, text)?;
            debug!(file = %file.display(), replacements = changed, "rewrote");
            total += changed;
        }
    }
    info!(replacements = total, "project initialized");
    Ok(total)
}
