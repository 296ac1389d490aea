use garland::{AbsoluteAddress, FileOptions, LibraryOptions};
use rand::prelude::*;
use test_log::test;

fn assert_matches_model(garland: &garland::Garland, model: &[u8]) -> garland::Result<()> {
    assert_eq!(model.len() as u64, garland.byte_count()?.value);
    assert_eq!(
        model,
        &*garland.read_range(0, model.len() as u64)?,
        "content diverged from model"
    );

    let lf = model.iter().filter(|&&b| b == b'\n').count() as u64;
    let expected_lines = if model.is_empty() {
        0
    } else if model.last() == Some(&b'\n') {
        lf
    } else {
        lf + 1
    };
    assert_eq!(expected_lines, garland.line_count()?.value);

    // the generator emits ASCII only, so runes == bytes
    assert_eq!(model.len() as u64, garland.rune_count()?.value);

    Ok(())
}

#[test]
fn random_edits_match_brute_force_model() -> garland::Result<()> {
    let mut rng = StdRng::seed_from_u64(0xDECAF);

    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string("seed\n"))?;

    let mut model: Vec<u8> = b"seed\n".to_vec();

    for _ in 0..120 {
        let len = model.len() as u64;

        if model.is_empty() || rng.random_bool(0.6) {
            let at = rng.random_range(0..=len);
            let word_len = rng.random_range(1..=12usize);
            let word: Vec<u8> = (0..word_len)
                .map(|_| {
                    if rng.random_bool(0.1) {
                        b'\n'
                    } else {
                        rng.random_range(b'a'..=b'z')
                    }
                })
                .collect();

            garland.seek(0, AbsoluteAddress::Byte(at))?;
            garland.insert_bytes(0, &word, None, false)?;

            model.splice(at as usize..at as usize, word.iter().copied());
        } else {
            let at = rng.random_range(0..len);
            let n = rng.random_range(1..=(len - at).min(9));

            garland.seek(0, AbsoluteAddress::Byte(at))?;
            garland.delete_bytes(0, n, false)?;

            model.drain(at as usize..(at + n) as usize);
        }

        assert_matches_model(&garland, &model)?;
    }

    library.close()
}

#[test]
fn undo_seek_walks_exact_states() -> garland::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);

    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    // record every intermediate state
    let mut states: Vec<Vec<u8>> = vec![Vec::new()];
    let mut model: Vec<u8> = Vec::new();

    for i in 0..40u64 {
        let len = model.len() as u64;

        if model.is_empty() || rng.random_bool(0.7) {
            let at = rng.random_range(0..=len);
            let word = format!("w{i} ");

            garland.seek(0, AbsoluteAddress::Byte(at))?;
            garland.insert_str(0, &word, false)?;

            model.splice(at as usize..at as usize, word.bytes());
        } else {
            let at = rng.random_range(0..len);
            let n = rng.random_range(1..=(len - at).min(5));

            garland.seek(0, AbsoluteAddress::Byte(at))?;
            garland.delete_bytes(0, n, false)?;

            model.drain(at as usize..(at + n) as usize);
        }

        states.push(model.clone());
    }

    // random walk through history; every visited state must be exact
    let head = garland.head()?.revision;
    assert_eq!(40, head);

    for _ in 0..30 {
        let target = rng.random_range(0..=head);

        garland.undo_seek(target)?;

        let expected = &states[target as usize];
        assert_eq!(
            expected.as_slice(),
            &*garland.read_range(0, expected.len() as u64)?,
            "state at revision {target}"
        );
        assert_eq!(expected.len() as u64, garland.byte_count()?.value);
    }

    // no fork was ever created by seeking
    assert_eq!(1, garland.list_forks()?.len());

    library.close()
}

#[test]
fn commit_increments_revision_by_one() -> garland::Result<()> {
    let library = LibraryOptions::new().open()?;
    let garland = library.open_file(FileOptions::string(""))?;

    let mut previous = garland.head()?;

    for i in 0..10 {
        let commit = garland.insert_str(0, &format!("{i}"), false)?;
        assert_eq!(previous.revision + 1, commit.revision);
        assert_eq!(previous.fork, commit.fork);
        previous = commit;
    }

    library.close()
}
