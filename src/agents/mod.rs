//! Agent directories and their isolated Python environments
//!
//! An agent is an immediate sub-directory of the agents root. Each agent may
//! carry a `.venv` virtual environment that run profiles are launched inside.

use std::path::{Path, PathBuf};

use crate::error::AppError;

/// The directory holding every agent
#[derive(Debug, Clone)]
pub struct AgentsRoot {
    root: PathBuf,
}

impl AgentsRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Agent names: visible sub-directories, sorted case-insensitively
    pub fn list_agents(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut agents: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();

        agents.sort_by_key(|name| name.to_lowercase());
        agents
    }

    /// Working directory of `agent`, if it exists
    pub fn resolve(&self, agent: &str) -> Result<PathBuf, AppError> {
        if agent.is_empty() || agent.contains('/') || agent.contains('\\') || agent == ".." {
            return Err(AppError::agent_not_found(agent));
        }
        let path = self.root.join(agent);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(AppError::agent_not_found(agent))
        }
    }
}

/// `.venv` inside an agent directory
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    dir: PathBuf,
}

impl VirtualEnv {
    pub fn for_agent(agent_dir: &Path) -> Self {
        Self {
            dir: agent_dir.join(".venv"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// POSIX activation script
    pub fn activate_script(&self) -> PathBuf {
        self.dir.join("bin").join("activate")
    }

    /// Interpreter path for the current platform
    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.dir.join("Scripts").join("python.exe")
        } else {
            self.dir.join("bin").join("python")
        }
    }

    /// Whether the environment can be used to launch a profile
    pub fn exists(&self) -> bool {
        if cfg!(windows) {
            self.python().is_file()
        } else {
            self.activate_script().is_file()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_list_agents_skips_hidden_and_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::create_dir(dir.path().join("Alpha")).unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let root = AgentsRoot::new(dir.path());
        assert_eq!(root.list_agents(), vec!["Alpha", "beta"]);
    }

    #[test]
    fn test_list_agents_missing_root() {
        let root = AgentsRoot::new("/definitely/not/here");
        assert!(root.list_agents().is_empty());
    }

    #[test]
    fn test_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("news")).unwrap();
        let root = AgentsRoot::new(dir.path());

        assert_eq!(root.resolve("news").unwrap(), dir.path().join("news"));
        assert!(root.resolve("missing").is_err());
        assert!(root.resolve("../news").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_venv_exists_when_activate_present() {
        let dir = tempfile::tempdir().unwrap();
        let venv = VirtualEnv::for_agent(dir.path());
        assert!(!venv.exists());

        fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
        fs::write(dir.path().join(".venv/bin/activate"), "").unwrap();
        assert!(venv.exists());
        assert_eq!(venv.python(), dir.path().join(".venv/bin/python"));
    }
}
