//! The staging → merge → orphan-cleanup algorithm described in the engine's
//! contract: a `walkdir` traversal over the staging tree, classified into
//! Added/Modified/Deleted against the live tree.

use crate::{DryRunDiff, Error, ExcludeSet, MappingKind, Plan, SyncResult};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug)]
pub enum Outcome {
    Applied(SyncResult),
    DryRun(DryRunDiff),
}

/// One unit of the "managed" subtree: the parts of the live directory the
/// engine is authorized to create, modify, and clean orphans within.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ManagedRoot {
    /// A destination directory, walked recursively during cleanup.
    Dir(String),
    /// A single destination file whose parent IS the live root — treated as
    /// a leaf so cleanup never considers its siblings at the live root.
    File(String),
}

pub fn execute(plan: &Plan) -> Result<Outcome, Error> {
    let started = Instant::now();
    let excludes = ExcludeSet::build(&plan.excludes)?;

    let mut errors = Vec::new();
    let managed_roots = build_staging(plan, &excludes)?;

    if plan.dry_run {
        let diff = diff_against_live(plan, &managed_roots, &excludes)?;
        cleanup_staging(plan)?;
        return Ok(Outcome::DryRun(diff));
    }

    let (added, modified, skipped) = merge_to_live(plan, &mut errors)?;
    let deleted = cleanup_orphans(plan, &managed_roots, &excludes, &mut errors)?;
    cleanup_staging(plan)?;

    Ok(Outcome::Applied(SyncResult {
        added,
        modified,
        deleted,
        skipped,
        projects_synced: count_top_level_projects(&plan.staging_dir),
        duration: started.elapsed(),
        errors,
    }))
}

fn cleanup_staging(plan: &Plan) -> Result<(), Error> {
    if plan.staging_dir.exists() {
        fs::remove_dir_all(&plan.staging_dir).map_err(|e| io_err(&plan.staging_dir, e))?;
    }
    Ok(())
}

/// Phase 1 + 2: recreate staging, copy every mapping in order (overlay
/// semantics: later mappings win), and compute the managed-root set.
fn build_staging(plan: &Plan, excludes: &ExcludeSet) -> Result<BTreeSet<ManagedRoot>, Error> {
    if plan.staging_dir.exists() {
        fs::remove_dir_all(&plan.staging_dir).map_err(|e| io_err(&plan.staging_dir, e))?;
    }
    fs::create_dir_all(&plan.staging_dir).map_err(|e| io_err(&plan.staging_dir, e))?;

    let mut managed_roots = BTreeSet::new();

    for mapping in &plan.mappings {
        if !mapping.source_abs.exists() {
            if mapping.required {
                return Err(Error::RequiredSourceMissing(mapping.source_abs.display().to_string()));
            }
            debug!(source = %mapping.source_abs.display(), "optional mapping source absent, skipping");
            continue;
        }

        managed_roots.insert(managed_root_for(mapping));

        match mapping.kind {
            MappingKind::File => {
                let dest = plan.staging_dir.join(&mapping.dest_rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                copy_preserving_permissions(&mapping.source_abs, &dest)?;
            }
            MappingKind::Dir => {
                copy_dir_overlay(&mapping.source_abs, &mapping.dest_rel, &plan.staging_dir, excludes)?;
            }
        }
    }

    Ok(managed_roots)
}

fn managed_root_for(mapping: &crate::ResolvedMapping) -> ManagedRoot {
    match mapping.kind {
        MappingKind::Dir => ManagedRoot::Dir(normalize(&mapping.dest_rel)),
        MappingKind::File => {
            let normalized = normalize(&mapping.dest_rel);
            match parent_component(&normalized) {
                Some(parent) => ManagedRoot::Dir(parent),
                None => ManagedRoot::File(normalized),
            }
        }
    }
}

fn parent_component(dest_rel: &str) -> Option<String> {
    match dest_rel.rfind('/') {
        Some(idx) if idx > 0 => Some(dest_rel[..idx].to_string()),
        _ => None,
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').replace('\\', "/")
}

fn copy_dir_overlay(
    source_root: &Path,
    dest_rel_root: &str,
    staging_dir: &Path,
    excludes: &ExcludeSet,
) -> Result<(), Error> {
    let walker = WalkDir::new(source_root).into_iter().filter_entry(|entry| {
        let rel = entry
            .path()
            .strip_prefix(source_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let dest_rel_full = join_rel(dest_rel_root, &rel);
        !excludes.is_protected(&dest_rel_full)
    });

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io {
            path: source_root.display().to_string(),
            source: e.into(),
        })?;

        if entry.path_is_symlink() {
            warn!(path = %entry.path().display(), "skipping symbolic link during copy");
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(source_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let dest_rel_full = join_rel(dest_rel_root, &rel);

        if !rel.is_empty() && excludes.is_excluded(&dest_rel_full) {
            continue;
        }

        let staging_path = staging_dir.join(&dest_rel_full);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&staging_path).map_err(|e| io_err(&staging_path, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = staging_path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            copy_preserving_permissions(entry.path(), &staging_path)?;
        }
    }

    Ok(())
}

fn join_rel(root: &str, rel: &str) -> String {
    if rel.is_empty() {
        normalize(root)
    } else if root.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), rel)
    }
}

fn copy_preserving_permissions(source: &Path, dest: &Path) -> Result<(), Error> {
    fs::copy(source, dest).map_err(|e| io_err(source, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::metadata(source).map_err(|e| io_err(source, e))?.permissions();
        fs::set_permissions(dest, fs::Permissions::from_mode(perms.mode()))
            .map_err(|e| io_err(dest, e))?;
    }
    Ok(())
}

/// Phase 3: merge staging into live. Returns (added, modified, skipped).
fn merge_to_live(plan: &Plan, errors: &mut Vec<String>) -> Result<(u64, u64, u64), Error> {
    let mut added = 0;
    let mut modified = 0;
    let mut skipped = 0;

    for entry in WalkDir::new(&plan.staging_dir).into_iter() {
        let entry = entry.map_err(|e| Error::Io {
            path: plan.staging_dir.display().to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || entry.path_is_symlink() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(&plan.staging_dir)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        let live_path = plan.live_dir.join(&rel);

        match classify(entry.path(), &live_path) {
            Ok(Classification::Absent) => {
                if let Some(parent) = live_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                copy_preserving_permissions(entry.path(), &live_path)?;
                added += 1;
            }
            Ok(Classification::Differs) => {
                copy_preserving_permissions(entry.path(), &live_path)?;
                modified += 1;
            }
            Ok(Classification::Identical) => {
                skipped += 1;
            }
            Err(e) => {
                errors.push(format!("{}: {}", live_path.display(), e));
            }
        }
    }

    Ok((added, modified, skipped))
}

enum Classification {
    Absent,
    Differs,
    Identical,
}

fn classify(staged: &Path, live: &Path) -> Result<Classification, Error> {
    if live.is_symlink() {
        // Never treated as equal to anything; always rewritten.
        return Ok(Classification::Differs);
    }
    if !live.exists() {
        return Ok(Classification::Absent);
    }
    let staged_meta = fs::metadata(staged).map_err(|e| io_err(staged, e))?;
    let live_meta = fs::metadata(live).map_err(|e| io_err(live, e))?;
    if staged_meta.len() != live_meta.len() {
        return Ok(Classification::Differs);
    }
    if files_equal(staged, live)? {
        Ok(Classification::Identical)
    } else {
        Ok(Classification::Differs)
    }
}

fn files_equal(a: &Path, b: &Path) -> Result<bool, Error> {
    let mut fa = fs::File::open(a).map_err(|e| io_err(a, e))?;
    let mut fb = fs::File::open(b).map_err(|e| io_err(b, e))?;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let na = fa.read(&mut buf_a).map_err(|e| io_err(a, e))?;
        let nb = fb.read(&mut buf_b).map_err(|e| io_err(b, e))?;
        if na != nb {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
        if buf_a[..na] != buf_b[..nb] {
            return Ok(false);
        }
    }
}

/// Phase 4: walk live restricted to managed roots, delete regular files
/// absent from staging and not excluded/protected. Errors are collected,
/// not fatal — cleanup continues best-effort.
fn cleanup_orphans(
    plan: &Plan,
    managed_roots: &BTreeSet<ManagedRoot>,
    excludes: &ExcludeSet,
    errors: &mut Vec<String>,
) -> Result<u64, Error> {
    let mut deleted = 0;

    for root in managed_roots {
        match root {
            ManagedRoot::File(path) => {
                let live_path = plan.live_dir.join(path);
                let staging_path = plan.staging_dir.join(path);
                if live_path.exists() && !live_path.is_symlink() && !staging_path.exists() {
                    if excludes.is_excluded(path) {
                        continue;
                    }
                    match fs::remove_file(&live_path) {
                        Ok(_) => deleted += 1,
                        Err(e) => errors.push(format!("{}: {}", live_path.display(), e)),
                    }
                }
            }
            ManagedRoot::Dir(root_rel) => {
                let live_root = plan.live_dir.join(root_rel);
                if !live_root.exists() {
                    continue;
                }

                let walker = WalkDir::new(&live_root).into_iter().filter_entry(|entry| {
                    let rel = rel_to_live(&plan.live_dir, entry.path());
                    !excludes.is_protected(&rel)
                });

                for entry in walker {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(e) => {
                            errors.push(e.to_string());
                            continue;
                        }
                    };
                    if entry.path_is_symlink() || !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = rel_to_live(&plan.live_dir, entry.path());
                    if excludes.is_excluded(&rel) {
                        continue;
                    }
                    let staging_counterpart = plan.staging_dir.join(&rel);
                    if !staging_counterpart.exists() {
                        match fs::remove_file(entry.path()) {
                            Ok(_) => deleted += 1,
                            Err(e) => errors.push(format!("{}: {}", entry.path().display(), e)),
                        }
                    }
                }
            }
        }
    }

    Ok(deleted)
}

fn rel_to_live(live_dir: &Path, path: &Path) -> String {
    path.strip_prefix(live_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Dry-run variant: path-set diff against live, live is never mutated.
fn diff_against_live(
    plan: &Plan,
    managed_roots: &BTreeSet<ManagedRoot>,
    excludes: &ExcludeSet,
) -> Result<DryRunDiff, Error> {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut staged_paths = BTreeSet::new();

    for entry in WalkDir::new(&plan.staging_dir).into_iter() {
        let entry = entry.map_err(|e| Error::Io {
            path: plan.staging_dir.display().to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || entry.path_is_symlink() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&plan.staging_dir)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        staged_paths.insert(rel.clone());

        let live_path = plan.live_dir.join(&rel);
        match classify(entry.path(), &live_path) {
            Ok(Classification::Absent) => added.push(rel),
            Ok(Classification::Differs) => modified.push(rel),
            Ok(Classification::Identical) => {}
            Err(_) => modified.push(rel),
        }
    }

    let mut deleted = Vec::new();
    for root in managed_roots {
        if let ManagedRoot::Dir(root_rel) = root {
            let live_root = plan.live_dir.join(root_rel);
            if !live_root.exists() {
                continue;
            }
            for entry in WalkDir::new(&live_root).into_iter().filter_map(|e| e.ok()) {
                if entry.path_is_symlink() || !entry.file_type().is_file() {
                    continue;
                }
                let rel = rel_to_live(&plan.live_dir, entry.path());
                if excludes.is_excluded(&rel) || staged_paths.contains(&rel) {
                    continue;
                }
                deleted.push(rel);
            }
        }
    }

    Ok(DryRunDiff { added, modified, deleted })
}

fn count_top_level_projects(staging_dir: &Path) -> u64 {
    fs::read_dir(staging_dir)
        .map(|rd| rd.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count() as u64)
        .unwrap_or(0)
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolvedMapping;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn plan(root: &TempDir, mappings: Vec<ResolvedMapping>) -> Plan {
        Plan {
            mappings,
            excludes: vec![],
            staging_dir: root.path().join(".sync-staging"),
            live_dir: root.path().join("live"),
            dry_run: false,
        }
    }

    #[test]
    fn overlay_precedence_later_mapping_wins() {
        let root = TempDir::new().unwrap();
        let base = root.path().join("src-base");
        let overlay = root.path().join("src-overlay");
        write(&base.join("app.json"), "base");
        write(&overlay.join("app.json"), "overlay");

        let p = plan(
            &root,
            vec![
                ResolvedMapping { source_abs: base, dest_rel: "config".into(), kind: MappingKind::Dir, required: true },
                ResolvedMapping { source_abs: overlay, dest_rel: "config".into(), kind: MappingKind::Dir, required: true },
            ],
        );

        let outcome = execute(&p).unwrap();
        let result = match outcome {
            Outcome::Applied(r) => r,
            _ => panic!("expected applied outcome"),
        };
        assert_eq!(result.added, 1);
        let live_contents = fs::read_to_string(p.live_dir.join("config/app.json")).unwrap();
        assert_eq!(live_contents, "overlay");
    }

    #[test]
    fn root_level_file_mapping_does_not_touch_siblings() {
        let root = TempDir::new().unwrap();
        let repo_file = root.path().join("repo/.versions.json");
        write(&repo_file, "{}");
        write(&root.path().join("live/config/local/manifest.json"), "keep-me");
        write(&root.path().join("live/db/config.idb"), "keep-me-too");

        let p = plan(
            &root,
            vec![ResolvedMapping {
                source_abs: repo_file,
                dest_rel: ".versions.json".into(),
                kind: MappingKind::File,
                required: true,
            }],
        );

        let outcome = execute(&p).unwrap();
        let result = match outcome {
            Outcome::Applied(r) => r,
            _ => panic!("expected applied outcome"),
        };
        assert_eq!(result.deleted, 0);
        assert!(p.live_dir.join(".versions.json").exists());
        assert!(p.live_dir.join("config/local/manifest.json").exists());
        assert!(p.live_dir.join("db/config.idb").exists());
    }

    #[test]
    fn protected_directory_survives_cleanup() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        write(&src.join(".resources/x"), "resource-data");
        write(&root.path().join("live/data/.resources/existing"), "pre-existing");

        let p = plan(
            &root,
            vec![ResolvedMapping {
                source_abs: src,
                dest_rel: "data".into(),
                kind: MappingKind::Dir,
                required: true,
            }],
        );

        execute(&p).unwrap();
        assert!(p.live_dir.join("data/.resources/existing").exists());
        assert!(!p.live_dir.join("data/.resources/x").exists());
    }

    #[test]
    fn rerun_against_same_commit_is_a_no_op() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        write(&src.join("app.json"), "v1");

        let p = plan(
            &root,
            vec![ResolvedMapping {
                source_abs: src,
                dest_rel: "config".into(),
                kind: MappingKind::Dir,
                required: true,
            }],
        );

        execute(&p).unwrap();
        let live_file = p.live_dir.join("config/app.json");
        let mtime_before = fs::metadata(&live_file).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let outcome = execute(&p).unwrap();
        let result = match outcome {
            Outcome::Applied(r) => r,
            _ => panic!("expected applied outcome"),
        };
        assert_eq!((result.added, result.modified, result.deleted), (0, 0, 0));
        let mtime_after = fs::metadata(&live_file).unwrap().modified().unwrap();
        assert_eq!(mtime_before, mtime_after);
    }

    #[test]
    fn required_mapping_missing_source_fails_without_mutating_live() {
        let root = TempDir::new().unwrap();
        let p = plan(
            &root,
            vec![ResolvedMapping {
                source_abs: root.path().join("does-not-exist"),
                dest_rel: "config".into(),
                kind: MappingKind::Dir,
                required: true,
            }],
        );

        let err = execute(&p).unwrap_err();
        assert!(matches!(err, Error::RequiredSourceMissing(_)));
        assert!(!p.live_dir.exists());
    }

    #[test]
    fn dry_run_never_mutates_live() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        write(&src.join("app.json"), "v1");
        write(&root.path().join("live/config/stale.json"), "stale");

        let mut p = plan(
            &root,
            vec![ResolvedMapping {
                source_abs: src,
                dest_rel: "config".into(),
                kind: MappingKind::Dir,
                required: true,
            }],
        );
        p.dry_run = true;

        let outcome = execute(&p).unwrap();
        let diff = match outcome {
            Outcome::DryRun(d) => d,
            _ => panic!("expected dry-run outcome"),
        };
        assert_eq!(diff.added, vec!["config/app.json".to_string()]);
        assert_eq!(diff.deleted, vec!["config/stale.json".to_string()]);
        assert!(!p.live_dir.join("config/app.json").exists());
        assert!(p.live_dir.join("config/stale.json").exists());
    }
}
