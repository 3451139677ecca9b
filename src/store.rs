//! One JSON file per session, replaced atomically on save.

use crate::session::Session;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn load(&self, id: Uuid) -> anyhow::Result<Option<Session>> {
        let path = self.path_for(id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow!(e))
                    .with_context(|| format!("failed to read session: {}", path.display()))
            }
        };
        let session: Session = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse session JSON: {}", path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create session directory: {}", self.dir.display()))?;

        let path = self.path_for(session.id);
        let tmp = tmp_path(&path);
        let bytes = serde_json::to_vec_pretty(session).context("failed to serialize session")?;
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("failed to write temp session: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move session into place: {}", path.display()))?;
        Ok(())
    }

    /// All stored sessions, most recently updated first.
    pub fn list(&self) -> anyhow::Result<Vec<Session>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow!(e))
                    .with_context(|| format!("failed to list sessions: {}", self.dir.display()))
            }
        };

        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(id) = session_id(&path) else {
                continue;
            };
            if let Some(s) = self.load(id)? {
                out.push(s);
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

fn session_id(path: &Path) -> Option<Uuid> {
    if path.extension()? != "json" {
        return None;
    }
    Uuid::parse_str(path.file_stem()?.to_str()?).ok()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "session.json".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}
