use garland::{AbsoluteAddress, FileOptions, LibraryOptions};
use test_log::test;

#[test]
fn counts_and_line_navigation() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("hello\nworld"))?;

    assert_eq!(2, garland.line_count()?.value);
    assert_eq!(11, garland.rune_count()?.value);
    assert_eq!(11, garland.byte_count()?.value);
    assert!(garland.byte_count()?.complete);

    let offset = garland.seek(0, AbsoluteAddress::LineRune { line: 1, column: 0 })?;
    assert_eq!(6, offset);

    assert_eq!("world", garland.read_line(0)?);
    assert_eq!(11, garland.cursor_position(0)?);

    // at the end, ReadLine returns empty
    assert_eq!("", garland.read_line(0)?);

    library.close()
}

#[test]
fn empty_and_trailing_lf_line_counts() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;

    let empty = library.open_file(FileOptions::string(""))?;
    assert_eq!(0, empty.line_count()?.value);
    assert_eq!(0, empty.byte_count()?.value);

    // LF count (1) plus nothing: the sequence ends in LF
    let trailing = library.open_file(FileOptions::string("one\n"))?;
    assert_eq!(1, trailing.line_count()?.value);

    let two = library.open_file(FileOptions::string("one\ntwo"))?;
    assert_eq!(2, two.line_count()?.value);

    library.close()
}

#[test]
fn multibyte_counts_and_addresses() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("aä€\nz"))?;

    assert_eq!(8, garland.byte_count()?.value);
    assert_eq!(5, garland.rune_count()?.value);
    assert_eq!(2, garland.line_count()?.value);

    // rune addressing lands on byte boundaries of whole scalars
    assert_eq!(3, garland.seek(0, AbsoluteAddress::Rune(2))?);
    assert_eq!(6, garland.seek(0, AbsoluteAddress::Rune(3))?);

    // column counted in code points
    assert_eq!(6, garland.seek(0, AbsoluteAddress::LineRune { line: 0, column: 3 })?);

    // columns clamp at the end of the line, not past its LF
    assert_eq!(6, garland.seek(0, AbsoluteAddress::LineRune { line: 0, column: 99 })?);

    // line overflow clamps to the end of data
    assert_eq!(8, garland.seek(0, AbsoluteAddress::LineRune { line: 9, column: 0 })?);

    library.close()
}

#[test]
fn relative_motion_uses_preferred_unit() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("aä€b"))?;

    let bytes = garland.create_cursor(garland::CursorUnit::Bytes)?;
    let runes = garland.create_cursor(garland::CursorUnit::Runes)?;

    assert_eq!(2, garland.seek_relative(bytes, 2)?);
    assert_eq!(6, garland.seek_relative(runes, 3)?);

    // clamped at both ends
    assert_eq!(0, garland.seek_relative(runes, -99)?);
    assert_eq!(7, garland.seek_relative(bytes, 99)?);

    // translation generation advances with commits
    let before = garland.cursor_generation(bytes)?;
    garland.insert_str(0, "!", false)?;
    assert!(garland.cursor_generation(bytes)? > before);

    library.close()
}

#[test]
fn operations_after_close_fail() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("data"))?;

    library.close()?;

    assert!(matches!(garland.byte_count(), Err(garland::Error::Closed)));
    assert!(matches!(
        garland.insert_str(0, "x", false),
        Err(garland::Error::Closed)
    ));
    assert!(matches!(
        library.open_file(FileOptions::string("y")),
        Err(garland::Error::Closed)
    ));

    Ok(())
}
