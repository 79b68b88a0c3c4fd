//! Caching layer for qrgate-core
//!
//! Content-addressed SQLite cache so a caption or story prompt is generated
//! once per distinct input.

pub mod result_cache;

pub use result_cache::{
    CacheLookup, CacheNamespace, CacheSample, CacheStats, ExportReport, ImportReport,
    NamespaceStats, ResultCache,
};
