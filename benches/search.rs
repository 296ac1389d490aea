use criterion::{criterion_group, criterion_main, Criterion};
use garland::{FileOptions, FindOptions, LibraryOptions, SearchDirection};

fn haystack(lines: u64) -> String {
    let mut text = String::new();

    for i in 0..lines {
        text.push_str(&format!("{i:08}: abcdefghij\n"));
    }

    text
}

fn forward(c: &mut Criterion) {
    let library = LibraryOptions::new().open().unwrap();
    let garland = library
        .open_file(FileOptions::string(&haystack(200_000)))
        .unwrap();

    c.bench_function("find forward deep", |b| {
        b.iter(|| {
            garland
                .find(b"00190000:", FindOptions::default())
                .unwrap()
                .unwrap()
        });
    });

    c.bench_function("find all", |b| {
        b.iter(|| garland.find_all(b"00019", FindOptions::default()).unwrap());
    });
}

fn backward(c: &mut Criterion) {
    let library = LibraryOptions::new().open().unwrap();
    let garland = library
        .open_file(FileOptions::string(&haystack(200_000)))
        .unwrap();

    let options = FindOptions {
        direction: SearchDirection::Backward,
        ..Default::default()
    };

    c.bench_function("find backward shallow", |b| {
        b.iter(|| garland.find(b"00199999:", options).unwrap().unwrap());
    });
}

criterion_group!(benches, forward, backward);
criterion_main!(benches);
