use garland::{AbsoluteAddress, FileOptions, LibraryOptions};
use test_log::test;

#[test]
fn diverging_edit_creates_fork() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("base"))?;

    garland.seek(0, AbsoluteAddress::Byte(4))?;
    let a = garland.insert_str(0, "-A", false)?;
    assert_eq!((0, 1), (a.fork, a.revision));

    garland.undo_seek(0)?;
    assert_eq!(b"base", &*garland.read_range(0, 4)?);

    garland.seek(0, AbsoluteAddress::Byte(4))?;
    let b = garland.insert_str(0, "-B", false)?;
    assert_eq!((1, 1), (b.fork, b.revision));

    let forks = garland.list_forks()?;
    assert_eq!(2, forks.len());
    assert_eq!(Some((0, 0)), forks[1].parent);

    // switching forks restores the other line of history
    garland.fork_seek(0)?;
    assert_eq!(b"base-A", &*garland.read_range(0, 6)?);

    garland.fork_seek(1)?;
    assert_eq!(b"base-B", &*garland.read_range(0, 6)?);

    library.close()
}

#[test]
fn fork_seek_crosses_deep_branches() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    // fork 0: "one two three"
    garland.insert_str(0, "one ", false)?;
    garland.insert_str(0, "two ", false)?;
    garland.insert_str(0, "three", false)?;

    // branch at (0, 1): "one TWO"
    garland.undo_seek(1)?;
    let head = garland.insert_str(0, "TWO", false)?;
    assert_eq!(1, head.fork);

    // branch off the branch at (1, 0) == content "one "
    garland.undo_seek(0)?;
    let head = garland.insert_str(0, "2", false)?;
    assert_eq!(2, head.fork);
    assert_eq!(b"one 2", &*garland.read_range(0, 5)?);

    garland.fork_seek(0)?;
    assert_eq!(b"one two three", &*garland.read_range(0, 13)?);

    garland.fork_seek(1)?;
    assert_eq!(b"one TWO", &*garland.read_range(0, 7)?);

    garland.fork_seek(2)?;
    assert_eq!(b"one 2", &*garland.read_range(0, 5)?);

    library.close()
}

#[test]
fn seek_does_not_fork() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    garland.insert_str(0, "a", false)?;
    garland.insert_str(0, "b", false)?;

    garland.undo_seek(1)?;
    garland.undo_seek(2)?;
    garland.undo_seek(0)?;

    assert_eq!(1, garland.list_forks()?.len());

    library.close()
}

#[test]
fn revision_metadata() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    garland.transaction_start(Some("setup"))?;
    garland.insert_str(0, "hello", false)?;
    garland.insert_str(0, " world", false)?;
    let commit = garland.transaction_commit()?;

    let info = garland.revision_info(commit.revision)?;
    assert_eq!(Some("setup".to_string()), info.name);
    assert_eq!(2, info.summary.edits);
    assert_eq!(11, info.summary.bytes_added);
    assert_eq!(0, info.summary.bytes_removed);

    let range = garland.revision_range(1, 1)?;
    assert_eq!(1, range.len());

    assert!(matches!(
        garland.revision_info(99),
        Err(garland::Error::OutOfRange(_))
    ));

    library.close()
}

#[test]
fn unknown_fork_is_out_of_range() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("x"))?;

    assert!(matches!(
        garland.fork_seek(3),
        Err(garland::Error::OutOfRange(3))
    ));

    library.close()
}
