// src/settings.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const SEPARATOR: &str = " = ";

/// Flat `key = value` store backed by a text file. Every call goes to disk.
pub struct Settings {
    path: PathBuf,
}

impl Settings {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating settings directory {}", dir.display()))?;
        }
        if !path.exists() {
            fs::write(&path, "")
                .with_context(|| format!("creating settings file {}", path.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(text.lines().map(str::to_owned).collect())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_lines()?.iter().find_map(|line| {
            let (k, v) = line.split_once(SEPARATOR)?;
            (k.trim() == key).then(|| v.trim().to_owned())
        }))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Replaces the first line for `key` in place, or appends one.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut found = false;
        let mut out = String::new();
        for line in self.read_lines()? {
            let matches = line
                .split_once(SEPARATOR)
                .is_some_and(|(k, _)| k.trim() == key);
            if matches && !found {
                found = true;
                out.push_str(&format!("{key}{SEPARATOR}{value}\n"));
            } else if !matches {
                out.push_str(&line);
                out.push('\n');
            }
        }
        if !found {
            out.push_str(&format!("{key}{SEPARATOR}{value}\n"));
        }
        fs::write(&self.path, out).with_context(|| format!("writing {}", self.path.display()))
    }

    /// Value for `key`, writing `default` first if the key has never been set.
    pub fn get_or_insert(&self, key: &str, default: &str) -> Result<String> {
        match self.get(key)? {
            Some(v) => Ok(v),
            None => {
                self.set(key, default)?;
                Ok(default.to_owned())
            }
        }
    }
}
