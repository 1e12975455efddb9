//! Chaos testing for fim
//!
//! Damages the repository and the tracked tree in ways a real disk or a
//! careless operator would, and checks that fim reports the damage instead
//! of silently producing wrong results.

use ::fim::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

const NO_PROGRESS: Option<fn(ProgressInfo)> = None;

/// Repository with a few committed snapshots to break
pub struct FimChaosTest {
    pub temp_dir: TempDir,
    pub fim: Fim,
    pub chaos_engine: ChaosEngine,
}

impl FimChaosTest {
    pub fn new(snapshots: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut fim = FimBuilder::new()
            .compress_snapshots(true)
            .build(temp_dir.path().to_path_buf())
            .unwrap();

        for round in 0..snapshots {
            for file in 0..10 {
                fs::write(
                    temp_dir.path().join(format!("file_{}_{}.txt", round, file)),
                    format!("round {} file {}", round, file).repeat(20),
                )
                .unwrap();
            }
            fim.commit(&format!("round {}", round), NO_PROGRESS).unwrap();
        }

        Self {
            temp_dir,
            fim,
            chaos_engine: ChaosEngine::new(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn state_path(&self, number: u32) -> PathBuf {
        self.fim.storage().state_path(number)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root().join(".fim").join("settings.json")
    }

    /// Reopen from disk, dropping every cached setting
    pub fn reopen(&mut self) -> Result<()> {
        self.fim = Fim::open(self.root().to_path_buf())?;
        Ok(())
    }
}

/// Seeded source of damage
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip one random bit of a byte inside `range`
    pub fn flip_bit_in(&mut self, content: &mut [u8], range: std::ops::Range<usize>) {
        let index = self.rng.random_range(range);
        let bit = self.rng.random_range(0..8);
        content[index] ^= 1 << bit;
        info!("Flipped bit {} of byte {}", bit, index);
    }

    /// Cut the file at a random point
    pub fn truncate(&mut self, path: &Path) -> std::io::Result<()> {
        let content = fs::read(path)?;
        let keep = self.rng.random_range(0..content.len());
        fs::write(path, &content[..keep])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_flips_never_load_silently() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(temp_dir.path().join(format!("photo_{}.jpg", i)), vec![i as u8; 100]).unwrap();
        }
        let mut fim = FimBuilder::new()
            .compress_snapshots(false)
            .build(temp_dir.path().to_path_buf())
            .unwrap();
        fim.commit("base", NO_PROGRESS).unwrap();

        let path = fim.storage().state_path(1);
        let pristine = fs::read(&path).unwrap();
        // raw frames store names verbatim, flip bits inside them only
        let offsets: Vec<usize> = pristine
            .windows(6)
            .enumerate()
            .filter(|(_, w)| *w == b"photo_")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(offsets.len(), 10);

        let mut engine = ChaosEngine::new(7);
        for offset in offsets {
            let mut damaged = pristine.clone();
            engine.flip_bit_in(&mut damaged, offset..offset + 6);
            fs::write(&path, &damaged).unwrap();
            match fim.load_snapshot(1) {
                Err(FimError::CorruptedSnapshot { number: 1, .. }) | Err(FimError::Bincode(_)) => {}
                other => panic!("damage went unnoticed: {:?}", other.map(|s| s.file_count())),
            }
        }

        fs::write(&path, &pristine).unwrap();
        assert_eq!(fim.load_snapshot(1).unwrap().file_count(), 10);
    }

    #[test]
    fn test_tampered_fingerprint_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "alpha").unwrap();
        let mut fim = FimBuilder::new()
            .compress_snapshots(false)
            .build(temp_dir.path().to_path_buf())
            .unwrap();
        fim.commit("base", NO_PROGRESS).unwrap();

        // raw frames store the file name verbatim
        let path = fim.storage().state_path(1);
        let content = fs::read(&path).unwrap();
        let offset = content
            .windows(5)
            .position(|w| w == b"a.txt")
            .expect("file name in raw snapshot");
        let mut tampered = content.clone();
        tampered[offset] = b'b';
        fs::write(&path, tampered).unwrap();

        assert!(matches!(
            fim.load_snapshot(1),
            Err(FimError::CorruptedSnapshot { number: 1, .. })
        ));
        let err = fim.status(NO_PROGRESS).unwrap_err();
        assert!(err.user_message().contains("fim rollback"));

        // rolling back the damaged snapshot recovers the repository
        assert_eq!(fim.rollback().unwrap(), Some(1));
        assert_eq!(fim.status(NO_PROGRESS).unwrap().modification_counts().added, 1);
    }

    #[test]
    fn test_truncated_snapshot() {
        let mut chaos = FimChaosTest::new(2);
        let path = chaos.state_path(2);
        chaos.chaos_engine.truncate(&path).unwrap();
        assert!(chaos.fim.load_snapshot(2).is_err());

        // log skips what it cannot read
        let log = chaos.fim.log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].number, 1);
    }

    #[test]
    fn test_pointer_behind_state_files() {
        let mut chaos = FimChaosTest::new(3);
        let settings = fs::read_to_string(chaos.settings_path()).unwrap();
        let rewound = settings.replace("\"lastSnapshotNumber\": 3", "\"lastSnapshotNumber\": 1");
        assert_ne!(settings, rewound);
        fs::write(chaos.settings_path(), rewound).unwrap();

        chaos.reopen().unwrap();
        assert_eq!(chaos.fim.storage().last_snapshot_number().unwrap(), 3);
        assert_eq!(chaos.fim.storage().settings().last_snapshot_number, 3);
    }

    #[test]
    fn test_pointer_ahead_of_state_files() {
        let mut chaos = FimChaosTest::new(3);
        fs::remove_file(chaos.state_path(3)).unwrap();

        chaos.reopen().unwrap();
        assert_eq!(chaos.fim.log().unwrap().len(), 2);
        let result = chaos.fim.commit("after loss", NO_PROGRESS).unwrap();
        assert_eq!(result.snapshot_number, Some(3));
        // the files of the lost round show up again
        assert_eq!(result.compare.modification_counts().added, 10);
    }

    #[test]
    fn test_damaged_settings() {
        let mut chaos = FimChaosTest::new(1);
        fs::write(chaos.settings_path(), "{ not json").unwrap();
        assert!(matches!(chaos.reopen(), Err(FimError::Json(_))));

        fs::remove_file(chaos.settings_path()).unwrap();
        assert!(matches!(
            chaos.reopen(),
            Err(FimError::RepositoryNotInitialized(_))
        ));
    }

    #[test]
    fn test_files_vanishing_during_scan() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(temp_dir.path().join(format!("file_{:02}.txt", i)), i.to_string()).unwrap();
        }

        // the walker sees every file, but odd ones are gone before hashing
        let root = temp_dir.path().to_path_buf();
        let saboteur = move |name: &str| {
            let index: usize = name[5..7].parse().unwrap_or(0);
            if index % 2 == 1 {
                let _ = fs::remove_file(root.join(name));
            }
            false
        };
        let generator = SnapshotGenerator::new(temp_dir.path(), HashMode::HashAll)
            .with_parallel_workers(4)
            .with_ignore_predicate(Arc::new(saboteur));

        let snapshot = generator.generate("chaos", NO_PROGRESS).unwrap();
        assert_eq!(snapshot.file_count(), 10);
        assert!(snapshot
            .fingerprints
            .iter()
            .all(|f| f.file_name[5..7].parse::<usize>().unwrap() % 2 == 0));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let secret = temp_dir.path().join("secret.txt");
        fs::write(&secret, "hidden").unwrap();
        fs::write(temp_dir.path().join("public.txt"), "visible").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // root can read anything
        if fs::read(&secret).is_ok() {
            return;
        }

        let mut fim = Fim::init(temp_dir.path().to_path_buf()).unwrap();
        fim.commit("partial", NO_PROGRESS).unwrap();
        let snapshot = fim.load_snapshot(1).unwrap();
        assert!(snapshot.get("public.txt").is_some());
        assert!(snapshot.get("secret.txt").is_none());

        fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_repeated_rollback_and_commit() {
        let mut chaos = FimChaosTest::new(2);
        for round in 0..5 {
            fs::write(chaos.root().join(format!("extra_{}.txt", round)), "extra").unwrap();
            let committed = chaos.fim.commit("extra", NO_PROGRESS).unwrap();
            assert_eq!(committed.snapshot_number, Some(3));
            assert_eq!(chaos.fim.rollback().unwrap(), Some(3));
            assert!(!chaos.state_path(3).exists());
        }
        assert_eq!(chaos.fim.log().unwrap().len(), 2);
        assert_eq!(chaos.fim.status(NO_PROGRESS).unwrap().modification_counts().added, 5);
    }
}
