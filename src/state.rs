use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Append-only progress ledger backed by an in-memory set.
///
/// Each entry is one newline-terminated line. A line only counts once its
/// newline is on disk, so a write torn by a crash is dropped (and trimmed
/// from the file) the next time the ledger is opened.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl Ledger {
    /// Open a ledger, treating a missing file as "nothing processed yet"
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let content = match read_committed(&path).await? {
            Some(content) => content,
            None => {
                debug!("📋 No ledger at {}, starting empty", path.display());
                return Ok(Self {
                    path,
                    entries: HashSet::new(),
                });
            }
        };

        let entries = parse_names(&content);

        debug!("📋 Loaded {} ledger entries from {}", entries.len(), path.display());

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Durably append `name`. Returns `false` if it was already recorded.
    pub async fn record(&mut self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() || name.contains('\n') || name.contains('\r') {
            return Err(anyhow!("Invalid ledger entry: {:?}", name));
        }

        if self.entries.contains(name) {
            return Ok(false);
        }

        append_line(&self.path, name).await?;

        self.entries.insert(name.to_string());
        Ok(true)
    }
}

/// Read a hand-maintained list of names, one per line.
///
/// The file is never modified and a final line without a newline still
/// counts. A missing file is an empty list.
pub async fn read_name_list(path: &Path) -> Result<HashSet<String>> {
    match fs::read(path).await {
        Ok(content) => Ok(parse_names(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(anyhow!("Failed to read {}: {}", path.display(), e)),
    }
}

fn parse_names(content: &[u8]) -> HashSet<String> {
    String::from_utf8_lossy(content)
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a newline-committed file, trimming any torn trailing line from disk.
///
/// Returns `None` when the file does not exist.
pub async fn read_committed(path: &Path) -> Result<Option<Vec<u8>>> {
    let mut content = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow!("Failed to read {}: {}", path.display(), e)),
    };

    let committed_len = match content.iter().rposition(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };

    if committed_len < content.len() {
        warn!("✂️  Dropping incomplete trailing line in {}", path.display());
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(committed_len as u64).await?;
        file.sync_all().await?;
        content.truncate(committed_len);
    }

    Ok(Some(content))
}

/// Durably append one newline-terminated line
pub async fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.sync_data().await?;
    Ok(())
}
