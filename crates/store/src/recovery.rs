/// Cold-start cleanup: temp files and orphans.
///
/// A crash mid-commit can leave three kinds of debris: `.tmp` files from
/// interrupted atomic writes, a segment file whose manifest rename never
/// happened, and a registry generation the manifest never adopted. All of
/// them are invisible to the committed state and safe to delete.
use log::warn;
use std::path::Path;

use crate::manifest::Manifest;

/// Deletes leftover `.tmp` files from interrupted writes.
pub(crate) fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".tmp") {
                    let _ = std::fs::remove_file(&p);
                }
            }
        }
    }
}

/// Deletes segment files and registry generations not named by the
/// manifest.
///
/// Best-effort: an orphan that cannot be removed is logged and left behind;
/// it stays invisible to the committed state either way.
pub(crate) fn sweep_orphans(dir: &Path, manifest: &Manifest) {
    let current_registry = registry::generation_path(dir, manifest.registry_generation);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let p = entry.path();
        let name = match p.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        let orphan = if name.ends_with(".seg") {
            !manifest.segments.iter().any(|s| s == name)
        } else if name.starts_with("sources-") && name.ends_with(".reg") {
            p != current_registry
        } else {
            false
        };

        if orphan {
            if let Err(e) = std::fs::remove_file(&p) {
                warn!("failed to remove orphan {}: {}", p.display(), e);
            }
        }
    }
}
