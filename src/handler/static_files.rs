//! Static file serving: path-traversal-safe resolution against a host's
//! source directory, with SPA `index.html` fallback (§4.2).

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::logger;

/// Resolve `path` against `source_dir`, falling back to `index.html` for
/// directory requests or when the exact path does not exist. Returns
/// `None` on any traversal attempt or read failure (caller maps to 404).
pub async fn load(source_dir: &str, path: &str) -> Option<(Vec<u8>, &'static str)> {
    let source_canonical = Path::new(source_dir).canonicalize().ok().or_else(|| {
        logger::log_warning(&format!("source directory missing: {source_dir}"));
        None
    })?;

    let relative = path.trim_start_matches('/');
    let mut candidate = PathBuf::from(source_dir).join(relative);

    if relative.is_empty() || candidate.is_dir() {
        candidate = candidate.join("index.html");
    }

    let resolved = match candidate.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let fallback = PathBuf::from(source_dir).join("index.html");
            fallback.canonicalize().ok()?
        }
    };

    if !resolved.starts_with(&source_canonical) {
        logger::log_warning(&format!("path traversal attempt blocked: {path}"));
        return None;
    }

    let content = fs::read(&resolved).await.ok()?;
    let content_type =
        crate::http::get_content_type(resolved.extension().and_then(|e| e.to_str()));
    Some((content, content_type))
}

/// Load a specific host's `index.html` directly, used by the loopback
/// fallback chain (§4.2) once no path match is found for any active host.
pub async fn load_index(source_dir: &str) -> Option<Vec<u8>> {
    fs::read(Path::new(source_dir).join("index.html")).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_traversal_outside_source_dir() {
        let dir = std::env::temp_dir().join("renderx-static-test");
        let _ = std::fs::create_dir_all(&dir);
        std::fs::write(dir.join("index.html"), "<html></html>").unwrap();

        let result = load(dir.to_str().unwrap(), "/../../etc/passwd").await;
        assert!(result.is_none(), "traversal outside the source directory must be rejected");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
