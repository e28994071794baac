// SPDX-License-Identifier: MIT

//! File system corpus - walks a repository and splits sources into chunks

use super::CorpusProvider;
use crate::adk::error::{Result, WorkflowError};
use crate::resolve::config::RetrievalSettings;
use crate::resolve::types::Chunk;
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Loads `.gitignore`-aware, test-free source chunks from disk
#[derive(Debug, Clone)]
pub struct FsCorpus {
    extensions: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FsCorpus {
    pub fn new(extensions: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self {
            extensions,
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self::new(
            settings.relevant_extensions.clone(),
            settings.chunk_size,
            settings.chunk_overlap,
        )
    }

    /// Source files under `root`, sorted for deterministic chunk order
    fn source_files(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root).hidden(true).git_ignore(true).build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|path| path.is_file())
            .filter(|path| self.has_relevant_extension(path))
            .filter(|path| !is_test_path(path.strip_prefix(root).unwrap_or(path.as_path())))
            .collect();

        files.sort();
        files
    }

    fn has_relevant_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl CorpusProvider for FsCorpus {
    fn load_chunks(&self, repo_path: &Path) -> Result<Vec<Chunk>> {
        if !repo_path.is_dir() {
            return Err(WorkflowError::CorpusUnavailable {
                path: repo_path.display().to_string(),
                reason: "not a directory".to_string(),
            }
            .into());
        }

        let mut chunks = Vec::new();
        for path in self.source_files(repo_path) {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Skipping unreadable file {}: {}", path.display(), e);
                    continue;
                }
            };

            let source = relative_source(repo_path, &path);
            let file_type = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();

            for piece in split_text(&text, self.chunk_size, self.chunk_overlap) {
                chunks.push(Chunk::new(source.clone(), file_type.clone(), piece));
            }
        }

        log::info!("Loaded {} chunks from {}", chunks.len(), repo_path.display());
        Ok(chunks)
    }
}

/// Repository-relative path with `/` separators
fn relative_source(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `test_*` files and anything below a `test`/`tests` directory
pub fn is_test_path(rel: &Path) -> bool {
    let file_is_test = rel
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("test_"));

    let in_test_dir = rel
        .parent()
        .map(|p| {
            p.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                name == "tests" || name == "test"
            })
        })
        .unwrap_or(false);

    file_is_test || in_test_dir
}

/// Split text into line-aligned pieces of at most `size` characters.
///
/// Each piece after the first starts with trailing lines of its predecessor
/// totalling at most `overlap` characters. Lines longer than `size` are cut
/// at character boundaries.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);

    let mut units: Vec<String> = Vec::new();
    for line in text.split_inclusive('\n') {
        if line.chars().count() <= size {
            units.push(line.to_string());
        } else {
            let chars: Vec<char> = line.chars().collect();
            units.extend(chars.chunks(size).map(|c| c.iter().collect::<String>()));
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for unit in &units {
        let unit_len = unit.chars().count();
        if current_len + unit_len > size && !current.is_empty() {
            chunks.push(current.concat());

            // Carry trailing lines into the next chunk
            let mut kept: Vec<&str> = Vec::new();
            let mut kept_len = 0usize;
            for prev in current.iter().rev() {
                let len = prev.chars().count();
                if kept_len + len > overlap {
                    break;
                }
                kept_len += len;
                kept.push(*prev);
            }
            kept.reverse();

            while kept_len + unit_len > size && !kept.is_empty() {
                kept_len -= kept.remove(0).chars().count();
            }
            current = kept;
            current_len = kept_len;
        }
        current.push(unit.as_str());
        current_len += unit_len;
    }
    if !current.is_empty() {
        chunks.push(current.concat());
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}
