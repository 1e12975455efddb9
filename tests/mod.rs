//! Main test module for fim
//!
//! This module includes all test suites:
//! - Integration tests for realistic change scenarios
//! - Chaos tests for damaged repositories and hostile trees
//! - Property-based tests for invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::fim::*;
    use std::fs;
    use tempfile::TempDir;

    const NO_PROGRESS: Option<fn(ProgressInfo)> = None;

    fn init(dir: &TempDir) -> Fim {
        FimBuilder::new()
            .parallel_workers(2)
            .build(dir.path().to_path_buf())
            .unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut fim = init(&temp_dir);

        let result = fim.commit("Empty", NO_PROGRESS).unwrap();
        assert_eq!(result.snapshot_number, Some(1));
        assert_eq!(fim.load_snapshot(1).unwrap().file_count(), 0);
        assert_eq!(fim.status(NO_PROGRESS).unwrap().to_string(), "Nothing modified");

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        let status = fim.status(NO_PROGRESS).unwrap();
        assert_eq!(status.modification_counts().added, 1);
    }

    #[test]
    fn test_empty_files_are_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("empty_1"), "").unwrap();
        fs::write(temp_dir.path().join("empty_2"), "").unwrap();
        let fim = init(&temp_dir);

        let duplicates = fim.find_duplicates(NO_PROGRESS).unwrap();
        assert_eq!(duplicates.sets.len(), 1);
        assert_eq!(duplicates.wasted_space, 0);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
            "file{with}braces.txt",
        ];

        let mut written = Vec::new();
        for name in &special_names {
            // skip names the OS rejects
            if fs::write(temp_dir.path().join(name), format!("Content of {}", name)).is_ok() {
                written.push(*name);
            }
        }

        let mut fim = init(&temp_dir);
        fim.commit("Special names", NO_PROGRESS).unwrap();
        let snapshot = fim.load_snapshot(1).unwrap();
        for name in &written {
            assert!(snapshot.get(name).is_some(), "missing {}", name);
        }
        assert!(!fim.status(NO_PROGRESS).unwrap().something_modified());
    }

    #[test]
    fn test_unicode_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let unicode_names = vec![
            "файл.txt",
            "文件.txt",
            "ファイル.txt",
            "αρχείο.txt",
            "🚀🌟💾.txt",
        ];
        for name in &unicode_names {
            fs::write(temp_dir.path().join(name), name.as_bytes()).unwrap();
        }

        let mut fim = init(&temp_dir);
        fim.commit("Unicode", NO_PROGRESS).unwrap();

        fs::rename(
            temp_dir.path().join("文件.txt"),
            temp_dir.path().join("文件_renamed.txt"),
        )
        .unwrap();
        let status = fim.status(NO_PROGRESS).unwrap();
        let renamed: Vec<_> = status.of_kind(Modification::Renamed).collect();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].previous_file_name(), Some("文件.txt"));
        assert_eq!(renamed[0].file_name(), "文件_renamed.txt");
    }

    #[test]
    fn test_deep_nesting() {
        let temp_dir = TempDir::new().unwrap();
        let mut deep = temp_dir.path().to_path_buf();
        for level in 0..40 {
            deep = deep.join(format!("level_{}", level));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("bottom.txt"), "deep").unwrap();

        let mut fim = init(&temp_dir);
        fim.commit("Deep", NO_PROGRESS).unwrap();
        let snapshot = fim.load_snapshot(1).unwrap();
        assert_eq!(snapshot.file_count(), 1);
        assert!(snapshot.fingerprints[0].file_name.starts_with("level_0/level_1/"));
        assert!(snapshot.fingerprints[0].file_name.ends_with("/bottom.txt"));
    }

    #[test]
    fn test_repository_directory_is_never_tracked() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        fs::write(temp_dir.path().join(".git/HEAD"), "ref").unwrap();

        let mut fim = init(&temp_dir);
        fim.commit("first", NO_PROGRESS).unwrap();
        fim.commit("second", NO_PROGRESS).unwrap();

        let snapshot = fim.load_snapshot(1).unwrap();
        let names: Vec<_> = snapshot.fingerprints.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
        // the first commit wrote into .fim, the tree itself did not change
        assert_eq!(fim.log().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_change_is_attributes_modified() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let mut fim = init(&temp_dir);
        fim.commit("first", NO_PROGRESS).unwrap();

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let status = fim.status(NO_PROGRESS).unwrap();
        assert_eq!(status.modification_counts().attributes_modified, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed_by_default() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("target.txt"), "outside").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();
        fs::write(temp_dir.path().join("inside.txt"), "inside").unwrap();

        let fim = init(&temp_dir);
        let snapshot = fim.scan(NO_PROGRESS).unwrap();
        assert_eq!(snapshot.file_count(), 1);

        let generator = SnapshotGenerator::new(temp_dir.path(), HashMode::HashAll)
            .with_follow_symlinks(true);
        let followed = generator.generate("", NO_PROGRESS).unwrap();
        assert!(followed.get("link/target.txt").is_some());
    }

    #[test]
    fn test_concurrent_readers() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(temp_dir.path().join(format!("file_{}.txt", i)), i.to_string()).unwrap();
        }
        let mut fim = init(&temp_dir);
        fim.commit("base", NO_PROGRESS).unwrap();

        let fim = Arc::new(fim);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fim = Arc::clone(&fim);
                thread::spawn(move || fim.status(NO_PROGRESS).unwrap().modified_count())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
    }
}
