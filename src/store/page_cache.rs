// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::store::BlobId;
use crate::Slice;
use quick_cache::{sync::Cache as QuickCache, Weighter};

/// Page size for paging spilled blobs back in
pub const PAGE_SIZE: u64 = 64 * 1_024;

#[derive(Eq, std::hash::Hash, PartialEq)]
struct CacheKey(BlobId, u64);

#[derive(Clone)]
struct PageWeighter;

impl Weighter<CacheKey, Slice> for PageWeighter {
    fn weight(&self, _: &CacheKey, page: &Slice) -> u64 {
        page.len() as u64
    }
}

/// Small LRU window over pages of spilled blobs.
///
/// Reads of a spilled blob transparently page in through this cache, so a
/// chilled blob stays seekable without pulling it back in full.
pub struct PageCache {
    data: QuickCache<CacheKey, Slice, PageWeighter, rustc_hash::FxBuildHasher>,
}

impl PageCache {
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        // NOTE: Nothing we can do if it fails
        #[allow(clippy::expect_used)]
        let opts = quick_cache::OptionsBuilder::new()
            .weight_capacity(bytes)
            .estimated_items_capacity((bytes / PAGE_SIZE) as usize)
            .build()
            .expect("cache options should be valid");

        #[allow(clippy::default_trait_access)]
        let quick_cache = QuickCache::with_options(
            opts,
            PageWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self { data: quick_cache }
    }

    #[must_use]
    pub fn get(&self, blob: BlobId, page: u64) -> Option<Slice> {
        self.data.get(&CacheKey(blob, page))
    }

    pub fn insert(&self, blob: BlobId, page: u64, data: Slice) {
        self.data.insert(CacheKey(blob, page), data);
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Returns the amount of cached bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.weight()
    }
}
