use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;

use crate::error::{GeneratorError, Result};
use crate::request::ReferenceFile;
use crate::stream::GeneratedFile;
use crate::util::safe_relative_path;

/// Reads every file of an uploaded reference archive. Directory entries are
/// skipped and contents are decoded as lossy UTF-8.
pub fn read_reference_zip(path: &Path) -> Result<Vec<ReferenceFile>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.push(ReferenceFile {
            path: name,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    info!(archive = %path.display(), files = files.len(), "loaded reference archive");
    Ok(files)
}

/// Script name of an uploaded archive: its file name without `.zip`.
pub fn script_name_from_archive(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let stem = name.strip_suffix(".zip").unwrap_or(&*name).trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

/// The files of one generation, in the order they first appeared.
#[derive(Debug, Clone, Default)]
pub struct ScriptBundle {
    files: Vec<GeneratedFile>,
}

impl ScriptBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, or replaces the content of the file with the same path
    /// while keeping its position.
    pub fn upsert(&mut self, file: GeneratedFile) {
        match self.files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn files(&self) -> &[GeneratedFile] {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes the bundle as a zip archive with every file under
    /// `<script_name>/`. Returns the archive path.
    pub fn write_zip(&self, script_name: &str, dest: &Path) -> Result<PathBuf> {
        let folder = bundle_folder(script_name)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let out = std::fs::File::create(dest)?;
        let mut writer = zip::ZipWriter::new(out);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for file in &self.files {
            let relative = safe_relative_path(&file.path)?;
            let entry = folder.join(relative);
            let entry_name = entry
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            debug!(entry = %entry_name, "adding file to archive");
            writer.start_file(entry_name, options)?;
            writer.write_all(file.content.as_bytes())?;
        }
        writer.finish()?;

        info!(archive = %dest.display(), files = self.files.len(), "wrote script archive");
        Ok(dest.to_path_buf())
    }

    /// Writes every file under `<dest_dir>/<script_name>/`. Returns that folder.
    pub fn write_dir(&self, script_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let root = dest_dir.join(bundle_folder(script_name)?);
        std::fs::create_dir_all(&root)?;

        for file in &self.files {
            let target = root.join(safe_relative_path(&file.path)?);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.content)?;
        }

        info!(folder = %root.display(), files = self.files.len(), "wrote script folder");
        Ok(root)
    }
}

fn bundle_folder(script_name: &str) -> Result<PathBuf> {
    let folder = safe_relative_path(script_name)
        .map_err(|_| GeneratorError::Custom(format!("Invalid script name: {script_name}")))?;
    if folder.components().count() != 1 {
        return Err(GeneratorError::Custom(format!(
            "Script name cannot contain path separators: {script_name}"
        )));
    }
    Ok(folder)
}
