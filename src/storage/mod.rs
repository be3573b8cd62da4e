use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

pub fn generate_submission_id() -> String {
    format!(
        "{}_{}",
        Utc::now().format("%Y%m%d"),
        &Uuid::new_v4().to_string()[..8]
    )
}

pub fn ensure_dirs(upload_folder: &Path, results_folder: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(upload_folder)?;
    std::fs::create_dir_all(results_folder)?;
    Ok(())
}

/// Reduce a client-supplied filename to a safe basename: path components and
/// anything outside `[A-Za-z0-9._-]` are stripped.
pub fn sanitize_filename(filename: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .replace(' ', "_");
    let cleaned = unsafe_chars.replace_all(&basename, "").to_string();
    let cleaned = cleaned.trim_matches('.').to_string();

    if cleaned.is_empty() {
        "paper.pdf".to_string()
    } else {
        cleaned
    }
}

/// Friendly attachment name for a downloaded artifact.
pub fn download_name(paper_title: Option<&str>, suffix: &str) -> String {
    let title = paper_title.unwrap_or("Research_Paper").replace(' ', "_");
    sanitize_filename(&format!("{title}_{suffix}"))
}
