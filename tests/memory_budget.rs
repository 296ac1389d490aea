use garland::{AbsoluteAddress, ChillMode, FileOptions, LibraryOptions, LoadingStyle};
use std::io::Write;
use test_log::test;

const SOFT: u64 = 64 * 1_024;
const HARD: u64 = 128 * 1_024;

fn wait_complete(garland: &garland::Garland) -> garland::Result<u64> {
    loop {
        let progress = garland.byte_count()?;

        if progress.complete {
            return Ok(progress.value);
        }

        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

#[test]
fn mapped_file_stays_under_budget() -> garland::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("large.bin");

    {
        let mut file = std::fs::File::create(&path).map_err(garland::Error::StorageFailure)?;
        for _ in 0..16 {
            file.write_all(&[b'z'; 64 * 1_024])
                .map_err(garland::Error::StorageFailure)?;
        }
    }

    let library = LibraryOptions::new()
        .cold_storage_path(dir.path().join("spill"))
        .memory_soft_limit(SOFT)
        .memory_hard_limit(HARD)
        .open()?;

    let garland = library.open_file(
        FileOptions::path(&path).loading_style(LoadingStyle::MappedOnly),
    )?;

    let total = wait_complete(&garland)?;
    assert_eq!(16 * 64 * 1_024, total);

    // sparse reads across the mapping
    for offset in [0u64, total / 2, total - 10] {
        let read = garland.read_range(offset, offset + 10)?;
        assert_eq!(&[b'z'; 10], &*read);
    }

    let usage = library.memory_usage()?;
    assert!(usage.memory_bytes <= HARD, "resident {usage:?}");
    assert_eq!(total, usage.mapped_bytes);

    library.close()
}

#[test]
fn chill_keeps_reads_bit_identical() -> garland::Result<()> {
    let dir = tempfile::tempdir()?;

    let library = LibraryOptions::new()
        .cold_storage_path(dir.path())
        .memory_soft_limit(SOFT)
        .memory_hard_limit(HARD)
        .open()?;

    let garland = library.open_file(FileOptions::string(""))?;

    // resident edit data beyond the soft budget
    let chunk: Vec<u8> = (0..16 * 1_024u32).map(|i| (i % 251) as u8).collect();

    for _ in 0..6 {
        let end = garland.byte_count()?.value;
        garland.seek(0, AbsoluteAddress::Byte(end))?;
        garland.insert_bytes(0, &chunk, None, false)?;
    }

    let before = garland.read_range(0, garland.byte_count()?.value)?;

    assert!(library.memory_usage()?.memory_bytes <= HARD);

    library.chill(ChillMode::UnusedData)?;

    let usage = library.memory_usage()?;
    assert_eq!(0, usage.memory_bytes, "everything unpinned was chilled");
    assert!(usage.spilled_bytes > 0);

    let after = garland.read_range(0, garland.byte_count()?.value)?;
    assert_eq!(before, after);

    library.close()
}

#[test]
fn hard_limit_without_spill_dir_fails() -> garland::Result<()> {
    let library = LibraryOptions::new().memory_hard_limit(1_024).open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    garland.insert_bytes(0, &[b'a'; 512], None, false)?;

    let result = garland.insert_bytes(0, &[b'b'; 1_024], None, false);
    assert!(matches!(
        result,
        Err(garland::Error::MemoryExhausted { .. })
    ));

    // the failed edit left no trace
    assert_eq!(512, garland.byte_count()?.value);
    assert_eq!(garland::Commit { fork: 0, revision: 1 }, garland.head()?);

    library.close()
}

#[test]
fn cold_revision_chill_compacts_history() -> garland::Result<()> {
    let dir = tempfile::tempdir()?;

    let library = LibraryOptions::new().cold_storage_path(dir.path()).open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    // 40 revisions that each deleted a resident kilobyte
    garland.insert_bytes(0, &vec![b'x'; 40 * 1_024], None, false)?;

    for _ in 0..40 {
        garland.seek(0, AbsoluteAddress::Byte(0))?;
        garland.delete_bytes(0, 1_024, false)?;
    }

    assert_eq!(0, garland.byte_count()?.value);

    library.chill(ChillMode::ColdRevisions)?;
    assert!(library.memory_usage()?.spilled_bytes > 0);

    // history still replays out of the spill files
    garland.undo_seek(1)?;
    assert_eq!(40 * 1_024, garland.byte_count()?.value);
    assert_eq!(
        vec![b'x'; 1_024],
        garland.read_range(0, 1_024)?.to_vec()
    );

    library.close()
}

#[test]
fn stale_spill_files_are_swept() -> garland::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("blob-99.bin"), b"stale")
        .map_err(garland::Error::StorageFailure)?;

    let library = LibraryOptions::new().cold_storage_path(dir.path()).open()?;

    assert!(!dir.path().join("blob-99.bin").try_exists()?);

    library.close()
}
