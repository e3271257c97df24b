pub mod catalog;
pub mod normalize;
pub mod types;

pub use catalog::lookup;
pub use types::{FieldSchema, ImportSchema, Normalizer};
