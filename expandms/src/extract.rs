//! Extraction pipeline (`spec.md` §4.6): entries are grouped by the
//! folder/section they share, walked in ascending `offset` order, and
//! written out under a path-traversal-safe relative path. A codec
//! failure on one entry poisons the rest of that entry's folder — the
//! remaining entries sharing its `folder_key` are skipped rather than
//! decoded from now-incoherent state — but does not affect other
//! folders.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::container::Entry;
use crate::error::{EntryError, ExpandError};

#[derive(Clone, Copy, Debug)]
pub struct ExtractionPolicy {
    pub overwrite: bool,
    pub preserve_paths: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self { overwrite: false, preserve_paths: true }
    }
}

/// Normalises an entry's stored name into a path safe to join under an
/// output directory: backslashes become forward slashes, `..` segments
/// and absolute roots are rejected outright, and `preserve_paths=false`
/// flattens everything to its basename (`spec.md` §4.6).
pub fn sanitize_relative_path(name: &[u8], preserve_paths: bool) -> Result<PathBuf, ExpandError> {
    let text = String::from_utf8_lossy(name).replace('\\', "/");
    let segments: Vec<&str> = text.split('/').filter(|s| !s.is_empty()).collect();

    for segment in &segments {
        if *segment == ".." {
            return Err(ExpandError::Policy(format!("entry name contains a `..` segment: {:?}", text)));
        }
    }
    if text.starts_with('/') && preserve_paths {
        return Err(ExpandError::Policy(format!("entry name is an absolute path: {:?}", text)));
    }
    if segments.is_empty() {
        return Err(ExpandError::Policy("entry name is empty after normalisation".to_string()));
    }

    if preserve_paths {
        Ok(segments.iter().collect())
    } else {
        Ok(PathBuf::from(segments.last().unwrap()))
    }
}

/// One group of entries sharing a folder/section key, in ascending
/// `offset` order (`spec.md` §4.6).
pub fn group_by_folder_ascending(entries: &[Entry]) -> Vec<(usize, Vec<Entry>)> {
    let mut groups: std::collections::BTreeMap<usize, Vec<Entry>> = std::collections::BTreeMap::new();
    for entry in entries {
        groups.entry(entry.folder_key).or_default().push(entry.clone());
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| e.offset_in_folder);
    }
    groups.into_iter().collect()
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<EntryError>,
}

/// Drives a full-archive extraction: groups entries by folder, and for
/// each group calls `extract_one(entry, writer)` in ascending-offset
/// order until either the group is exhausted or `extract_one` fails, in
/// which case the rest of that group is recorded as failed and skipped
/// without being attempted (its folder's codec state is no longer
/// trustworthy) while extraction continues with the next folder.
///
/// Output is written atomically: each entry is first written to a
/// temporary file beside its final path, then renamed into place, so a
/// crash mid-write never leaves a half-written file at the destination
/// name.
pub fn extract_all<F>(
    entries: &[Entry],
    output_dir: &Path,
    policy: &ExtractionPolicy,
    mut extract_one: F,
) -> ExtractionOutcome
where
    F: FnMut(&Entry, &mut dyn Write) -> Result<(), ExpandError>,
{
    let mut outcome = ExtractionOutcome::default();

    for (_, group) in group_by_folder_ascending(entries) {
        for entry in group {
            let relative = match sanitize_relative_path(&entry.name, policy.preserve_paths) {
                Ok(p) => p,
                Err(err) => {
                    outcome.failed.push(EntryError { path: PathBuf::from(String::from_utf8_lossy(&entry.name).into_owned()), source: err });
                    continue;
                }
            };
            let final_path = output_dir.join(&relative);

            if final_path.exists() && !policy.overwrite {
                outcome.failed.push(EntryError {
                    path: final_path.clone(),
                    source: ExpandError::Policy(format!("{} already exists", final_path.display())),
                });
                // Existing-file policy is not a folder-codec failure;
                // siblings in the same folder are still attempted.
                continue;
            }

            if let Some(parent) = final_path.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    outcome.failed.push(EntryError { path: final_path.clone(), source: ExpandError::from(err) });
                    break;
                }
            }

            let mut temp_file_name = final_path.file_name().unwrap_or_default().to_os_string();
            temp_file_name.push(".partial");
            let temp_path = final_path.with_file_name(temp_file_name);

            let result = (|| -> Result<(), ExpandError> {
                let mut file = fs::File::create(&temp_path)?;
                extract_one(&entry, &mut file)?;
                file.flush()?;
                Ok(())
            })();

            match result {
                Ok(()) => {
                    if let Err(err) = fs::rename(&temp_path, &final_path) {
                        let _ = fs::remove_file(&temp_path);
                        outcome.failed.push(EntryError { path: final_path, source: ExpandError::from(err) });
                        break;
                    }
                    outcome.succeeded.push(final_path);
                }
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    outcome.failed.push(EntryError { path: final_path, source: err });
                    // The codec state behind this folder is no longer
                    // coherent; skip the rest of this group.
                    break;
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EntryAttributes;

    fn entry(name: &str, folder_key: usize, offset: u64) -> Entry {
        Entry {
            name: name.as_bytes().to_vec(),
            uncompressed_length: 0,
            offset_in_folder: offset,
            folder_key,
            attributes: EntryAttributes::default(),
            timestamp: None,
        }
    }

    #[test]
    fn normalises_backslashes_and_preserves_subdirectories() {
        let path = sanitize_relative_path(b"docs\\readme.txt", true).unwrap();
        assert_eq!(path, PathBuf::from("docs/readme.txt"));
    }

    #[test]
    fn rejects_parent_directory_segments() {
        assert!(matches!(sanitize_relative_path(b"../evil.txt", true), Err(ExpandError::Policy(_))));
    }

    #[test]
    fn rejects_absolute_roots_when_preserving_paths() {
        assert!(matches!(sanitize_relative_path(b"/etc/passwd", true), Err(ExpandError::Policy(_))));
    }

    #[test]
    fn flattening_keeps_only_the_basename() {
        let path = sanitize_relative_path(b"a/b/c.txt", false).unwrap();
        assert_eq!(path, PathBuf::from("c.txt"));
    }

    #[test]
    fn groups_are_sorted_ascending_by_offset_within_each_folder() {
        let entries = vec![entry("b", 0, 20), entry("a", 0, 5), entry("c", 1, 0)];
        let groups = group_by_folder_ascending(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.iter().map(|e| e.offset_in_folder).collect::<Vec<_>>(), vec![5, 20]);
    }

    #[test]
    fn a_failing_entry_skips_the_rest_of_its_folder_but_not_other_folders() {
        let entries = vec![entry("first", 0, 0), entry("second", 0, 10), entry("other", 1, 0)];
        let dir = std::env::temp_dir().join(format!("expandms-extract-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let policy = ExtractionPolicy::default();
        let outcome = extract_all(&entries, &dir, &policy, |entry, writer| {
            if entry.name == b"first" {
                writer.write_all(b"ok")?;
                Ok(())
            } else if entry.name == b"second" {
                Err(ExpandError::TruncatedInput)
            } else {
                writer.write_all(b"ok2")?;
                Ok(())
            }
        });

        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        fs::remove_dir_all(&dir).ok();
    }
}
