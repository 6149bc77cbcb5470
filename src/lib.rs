pub mod dict;
pub mod error;
pub mod index;
pub mod indexer;
pub mod io;
pub mod record;
pub mod region;

pub use dict::ReferenceDictionary;
pub use index::{
    binning::BinningScheme,
    builder::IndexBuilder,
    reference::{Chunk, VirtualOffset},
    Index, IndexFormat,
};
pub use indexer::Indexer;
pub use record::{Config, Preset};
pub use region::{Region, RegionFlags};
