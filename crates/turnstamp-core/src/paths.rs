use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const HISTORY_DIR: &str = ".specstory/history";
pub const TIMESTAMPS_DIR: &str = ".specstory/timestamps";
pub const RUNTIME_DIR: &str = ".specstory/.turnstamp";

/// Directory conventions under one project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR)
    }

    pub fn timestamps_dir(&self) -> PathBuf {
        self.root.join(TIMESTAMPS_DIR)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join(RUNTIME_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.runtime_dir().join("logs")
    }

    pub fn handle_path(&self, session_id: &str) -> PathBuf {
        self.runtime_dir().join(format!("watcher-{session_id}.json"))
    }

    /// Every transcript currently in the history dir. A missing dir reads
    /// as empty; the producer may not have created it yet.
    pub fn transcripts(&self) -> Vec<PathBuf> {
        list_transcripts(&self.history_dir()).unwrap_or_default()
    }
}

pub fn list_transcripts(history_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = match fs::read_dir(history_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn conventional_layout_under_root() {
        let paths = ProjectPaths::new("/work/project");
        assert_eq!(
            paths.history_dir(),
            PathBuf::from("/work/project/.specstory/history")
        );
        assert_eq!(
            paths.timestamps_dir(),
            PathBuf::from("/work/project/.specstory/timestamps")
        );
        assert_eq!(
            paths.handle_path("abc"),
            PathBuf::from("/work/project/.specstory/.turnstamp/watcher-abc.json")
        );
    }

    #[test]
    fn transcripts_lists_only_markdown_and_tolerates_missing_dir() {
        let dir = TempDir::new().expect("temp dir");
        let paths = ProjectPaths::new(dir.path());
        assert!(paths.transcripts().is_empty());

        let history = paths.history_dir();
        fs::create_dir_all(&history).expect("history dir");
        fs::write(history.join("a.md"), "").expect("write");
        fs::write(history.join("b.md"), "").expect("write");
        fs::write(history.join("notes.txt"), "").expect("write");

        let found = paths.transcripts();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "md"));
    }
}
