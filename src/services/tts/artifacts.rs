//! Поиск аудиофайла, созданного внешним процессом
//!
//! Бэкенд не сообщает, куда записал результат, поэтому файл ищется по
//! расширению: сначала запрошенный формат в рабочем каталоге бэкенда, затем
//! остальные форматы в порядке wav, mp3, flac, затем запрошенный формат в
//! выходном каталоге. Из нескольких кандидатов берётся самый свежий.
//!
//! Бэкенд называет результат по имени текстового файла задания
//! (`tts_job_XXXX_generated.wav`), поэтому файлы с меткой своего задания
//! предпочитаются, а файлы с меткой чужого задания не берутся никогда.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::models::OutputFormat;

/// Name prefix shared by every job's text file, and so by tagged outputs.
pub const JOB_FILE_PREFIX: &str = "tts_job_";

/// A discovered audio artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub modified: SystemTime,
}

/// Locate the audio file produced by the last synthesis run.
///
/// Files modified before `not_before` are ignored when it is set. `job_tag`
/// is the stem of the job's text file.
pub fn find_artifact(
    working_dir: &Path,
    output_dir: &Path,
    requested: OutputFormat,
    not_before: Option<SystemTime>,
    job_tag: Option<&str>,
) -> Option<Artifact> {
    let search = |root: &Path, format: OutputFormat| {
        newest_with_format(root, format, not_before, job_tag)
    };

    if let Some(found) = search(working_dir, requested) {
        return Some(found);
    }

    for format in OutputFormat::FALLBACK_ORDER {
        if format == requested {
            continue;
        }
        if let Some(found) = search(working_dir, format) {
            log::warn!(
                "No .{} output found, falling back to {}",
                requested,
                found.path.display()
            );
            return Some(found);
        }
    }

    search(output_dir, requested)
}

/// Most recently modified file under `root` (recursive) with the format's extension.
///
/// With a `job_tag`, files named after that job win over untagged ones and
/// files tagged for other jobs are skipped.
pub fn newest_with_format(
    root: &Path,
    format: OutputFormat,
    not_before: Option<SystemTime>,
    job_tag: Option<&str>,
) -> Option<Artifact> {
    let candidates: Vec<Artifact> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| has_extension(entry.path(), format))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some(Artifact {
                path: entry.into_path(),
                format,
                modified,
            })
        })
        .filter(|artifact| not_before.map_or(true, |limit| artifact.modified >= limit))
        .collect();

    let Some(tag) = job_tag else {
        return candidates.into_iter().max_by_key(|artifact| artifact.modified);
    };

    let (own, others): (Vec<Artifact>, Vec<Artifact>) = candidates
        .into_iter()
        .partition(|artifact| file_name(&artifact.path).contains(tag));
    if let Some(found) = own.into_iter().max_by_key(|artifact| artifact.modified) {
        return Some(found);
    }
    others
        .into_iter()
        .filter(|artifact| !file_name(&artifact.path).contains(JOB_FILE_PREFIX))
        .max_by_key(|artifact| artifact.modified)
}

fn file_name(path: &Path) -> std::borrow::Cow<'_, str> {
    path.file_name().unwrap_or_default().to_string_lossy()
}

fn has_extension(path: &Path, format: OutputFormat) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(format.extension()))
}
