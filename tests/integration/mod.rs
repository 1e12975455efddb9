//! Integration tests for fim
//!
//! Builds randomized trees, applies known mutations and checks that every
//! mutation is reported with the right classification.

use ::fim::*;
use filetime::FileTime as MTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

const NO_PROGRESS: Option<fn(ProgressInfo)> = None;

/// Test harness for change-tracking scenarios
pub struct FimTestHarness {
    pub temp_dir: TempDir,
    pub fim: Fim,
    pub file_generator: FileGenerator,
    /// Expected classification of every mutated file, keyed by its current name
    pub expected: BTreeMap<String, Modification>,
}

impl FimTestHarness {
    /// Create a new test harness
    pub fn new(mode: HashMode) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let fim = FimBuilder::new()
            .hash_mode(mode)
            .parallel_workers(4)
            .build(temp_dir.path().to_path_buf())
            .unwrap();

        Self {
            temp_dir,
            fim,
            file_generator: FileGenerator::new(42),
            expected: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Generate a directory tree with unique file contents
    pub fn generate_project(&mut self, config: &ProjectConfig) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for dir_idx in 0..config.dirs {
            let dir = self.root().join(format!("dir_{}", dir_idx));
            fs::create_dir_all(&dir)?;
            for file_idx in 0..config.files_per_dir {
                let name = format!("dir_{}/file_{}.bin", dir_idx, file_idx);
                let mut content = self
                    .file_generator
                    .generate_file_content(config.file_size_range.clone());
                // make every file unique
                content.extend_from_slice(name.as_bytes());
                fs::write(self.root().join(&name), &content)?;
                names.push(name);
            }
        }
        info!("Generated {} files", names.len());
        Ok(names)
    }

    pub fn delete(&mut self, name: &str) -> anyhow::Result<()> {
        fs::remove_file(self.root().join(name))?;
        self.expected.insert(name.to_string(), Modification::Deleted);
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        fs::rename(self.root().join(from), self.root().join(to))?;
        self.expected.insert(to.to_string(), Modification::Renamed);
        Ok(())
    }

    pub fn add(&mut self, name: &str) -> anyhow::Result<()> {
        let mut content = self.file_generator.generate_binary_content(2048);
        content.extend_from_slice(name.as_bytes());
        fs::write(self.root().join(name), content)?;
        self.expected.insert(name.to_string(), Modification::Added);
        Ok(())
    }

    /// Copy `from` to `to` without touching `from`
    pub fn duplicate(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        fs::copy(self.root().join(from), self.root().join(to))?;
        self.expected.insert(to.to_string(), Modification::Duplicated);
        Ok(())
    }

    /// Copy `from` to `to`, then rewrite `from`
    pub fn copy_and_edit(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        fs::copy(self.root().join(from), self.root().join(to))?;
        self.rewrite(from, b"edited after copy")?;
        self.expected.insert(to.to_string(), Modification::Copied);
        Ok(())
    }

    pub fn edit(&mut self, name: &str) -> anyhow::Result<()> {
        self.rewrite(name, b"edited")?;
        self.expected.insert(name.to_string(), Modification::ContentModified);
        Ok(())
    }

    /// Move the modification time only
    pub fn touch(&mut self, name: &str) -> anyhow::Result<()> {
        let path = self.root().join(name);
        let mtime = MTime::from_last_modification_time(&fs::metadata(&path)?);
        let later = MTime::from_unix_time(mtime.unix_seconds() + 3600, mtime.nanoseconds());
        filetime::set_file_mtime(&path, later)?;
        self.expected.insert(name.to_string(), Modification::DateModified);
        Ok(())
    }

    /// Flip one byte and restore the modification time
    pub fn corrupt(&mut self, name: &str) -> anyhow::Result<()> {
        let path = self.root().join(name);
        let mtime = MTime::from_last_modification_time(&fs::metadata(&path)?);
        let mut content = fs::read(&path)?;
        let middle = content.len() / 2;
        content[middle] ^= 0xff;
        fs::write(&path, content)?;
        filetime::set_file_mtime(&path, mtime)?;
        self.expected.insert(name.to_string(), Modification::Corrupted);
        Ok(())
    }

    fn rewrite(&self, name: &str, suffix: &[u8]) -> anyhow::Result<()> {
        let path = self.root().join(name);
        let mtime = MTime::from_last_modification_time(&fs::metadata(&path)?);
        let mut content = fs::read(&path)?;
        content.extend_from_slice(suffix);
        fs::write(&path, content)?;
        // guarantee a visible date change even on coarse clocks
        let later = MTime::from_unix_time(mtime.unix_seconds() + 60, mtime.nanoseconds());
        filetime::set_file_mtime(&path, later)?;
        Ok(())
    }

    /// Classification of each reported file name
    pub fn reported(result: &CompareResult) -> BTreeMap<String, Modification> {
        result
            .entries()
            .iter()
            .map(|(kind, difference)| (difference.file_name().to_string(), *kind))
            .collect()
    }
}

/// Deterministic content generator
pub struct FileGenerator {
    rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Text-like content with a random length in `size_range`
    pub fn generate_file_content(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        (0..size)
            .map(|_| {
                let c = self.rng.random_range(0..64u8);
                match c {
                    0..=25 => b'a' + c,
                    26..=51 => b'A' + (c - 26),
                    52..=61 => b'0' + (c - 52),
                    _ => b'\n',
                }
            })
            .collect()
    }

    pub fn generate_binary_content(&mut self, size: usize) -> Vec<u8> {
        let mut content = vec![0u8; size];
        self.rng.fill(&mut content[..]);
        content
    }
}

/// Shape of a generated tree
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub dirs: usize,
    pub files_per_dir: usize,
    pub file_size_range: std::ops::Range<usize>,
}

impl Default for ProjectConfig {
    /// Files stay below one small block so every tier sees every byte
    fn default() -> Self {
        Self {
            dirs: 4,
            files_per_dir: 10,
            file_size_range: 100..4_000,
        }
    }
}

fn pick(names: &[String], index: usize) -> String {
    names[index].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_is_classified() {
        for mode in [HashMode::HashSmallBlock, HashMode::HashMediumBlock, HashMode::HashAll] {
            let mut harness = FimTestHarness::new(mode);
            let names = harness.generate_project(&ProjectConfig::default()).unwrap();
            harness.fim.commit("base", NO_PROGRESS).unwrap();

            harness.delete(&pick(&names, 0)).unwrap();
            harness.rename(&pick(&names, 1), "dir_0/renamed.bin").unwrap();
            harness.add("dir_1/new.bin").unwrap();
            harness.duplicate(&pick(&names, 12), "dir_1/duplicate.bin").unwrap();
            harness.copy_and_edit(&pick(&names, 13), "dir_1/copy.bin").unwrap();
            harness.edit(&pick(&names, 20)).unwrap();
            harness.touch(&pick(&names, 30)).unwrap();
            // the source of a copy is itself edited
            harness
                .expected
                .insert(pick(&names, 13), Modification::ContentModified);

            let status = harness.fim.status(NO_PROGRESS).unwrap();
            assert_eq!(
                FimTestHarness::reported(&status),
                harness.expected,
                "mode {}",
                mode
            );
            assert_eq!(status.modified_count(), harness.expected.len());
        }
    }

    #[test]
    fn test_corruption_among_regular_changes() {
        let mut harness = FimTestHarness::new(HashMode::HashAll);
        let names = harness.generate_project(&ProjectConfig::default()).unwrap();
        harness.fim.commit("base", NO_PROGRESS).unwrap();

        harness.corrupt(&pick(&names, 5)).unwrap();
        harness.corrupt(&pick(&names, 25)).unwrap();
        harness.edit(&pick(&names, 7)).unwrap();

        let result = harness.fim.detect_corruption(NO_PROGRESS).unwrap();
        let corrupted: Vec<_> = result
            .of_kind(Modification::Corrupted)
            .map(|d| d.file_name().to_string())
            .collect();
        let mut expected = vec![pick(&names, 5), pick(&names, 25)];
        expected.sort();
        assert_eq!(corrupted, expected);

        // the edited file has a new date, so it is a regular change
        assert_eq!(result.modification_counts().content_modified, 1);
    }

    #[test]
    fn test_history_of_many_commits() {
        let mut harness = FimTestHarness::new(HashMode::HashAll);
        let names = harness
            .generate_project(&ProjectConfig {
                dirs: 2,
                files_per_dir: 5,
                file_size_range: 10..500,
            })
            .unwrap();
        harness.fim.commit("base", NO_PROGRESS).unwrap();

        for round in 0..5 {
            harness.add(&format!("dir_0/round_{}.bin", round)).unwrap();
            harness.edit(&pick(&names, round)).unwrap();
            let result = harness
                .fim
                .commit(&format!("round {}", round), NO_PROGRESS)
                .unwrap();
            assert_eq!(result.snapshot_number, Some(round as u32 + 2));
            assert_eq!(result.compare.modified_count(), 2);
        }

        let log = harness.fim.log().unwrap();
        assert_eq!(log.len(), 6);
        assert!(log.windows(2).all(|w| w[0].number + 1 == w[1].number));
        assert_eq!(log[5].file_count, 15);

        let overall = harness.fim.compare_snapshots(1, 6).unwrap();
        assert_eq!(overall.modification_counts().added, 5);
        assert_eq!(overall.modification_counts().content_modified, 5);
    }

    #[test]
    fn test_ignore_files_and_patterns() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("build/output.o"), "obj").unwrap();
        fs::write(root.join("src/main.c"), "int main;").unwrap();
        fs::write(root.join("src/scratch.tmp"), "tmp").unwrap();
        fs::write(root.join("cache.db"), "db").unwrap();
        fs::write(root.join(".fimignore"), "build/\n").unwrap();

        let mut fim = FimBuilder::new()
            .ignore_patterns(vec!["*.tmp".to_string(), "cache.db".to_string()])
            .build(root.to_path_buf())
            .unwrap();
        fim.commit("base", NO_PROGRESS).unwrap();

        let names: Vec<PathBuf> = fim
            .load_snapshot(1)
            .unwrap()
            .fingerprints
            .iter()
            .map(|f| PathBuf::from(&f.file_name))
            .collect();
        assert_eq!(names, vec![PathBuf::from("src/main.c")]);

        // ignored files never show up as changes
        fs::write(root.join("build/another.o"), "obj").unwrap();
        fs::write(root.join("src/more.tmp"), "tmp").unwrap();
        assert!(!fim.status(NO_PROGRESS).unwrap().something_modified());
    }

    #[test]
    fn test_massive_file_count() {
        let mut harness = FimTestHarness::new(HashMode::HashSmallBlock);
        let names = harness
            .generate_project(&ProjectConfig {
                dirs: 20,
                files_per_dir: 50,
                file_size_range: 10..200,
            })
            .unwrap();

        let result = harness.fim.commit("base", NO_PROGRESS).unwrap();
        assert_eq!(result.compare.modification_counts().added, names.len());

        for name in names.iter().step_by(10) {
            harness.delete(name).unwrap();
        }
        let status = harness.fim.status(NO_PROGRESS).unwrap();
        assert_eq!(status.modification_counts().deleted, 100);
    }
}
