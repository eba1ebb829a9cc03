//! Bar sources, panels, and the selection-set cache

pub mod cache;
pub mod csv_source;
pub mod panel;
pub mod parquet_store;
pub mod resample;
pub mod source;
pub mod store;
pub mod synthetic;
pub mod universe;

pub use cache::{
    CacheEntry, CacheKey, CacheLookup, CacheMode, Clock, EntryMeta, EntryStatus, ManualClock,
    MissReason, Namespace, SelectionCache, SystemClock,
};
pub use csv_source::CsvBarSource;
pub use panel::{BarPanel, PanelSpec};
pub use parquet_store::ParquetPanelStore;
pub use resample::resample_weekly;
pub use source::{BarSource, DataError, MemoryBarSource};
pub use store::{CacheError, MemoryPanelStore, PanelStore};
pub use synthetic::SyntheticBarSource;
pub use universe::{SymbolEntry, UniverseFile};
