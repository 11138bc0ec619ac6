mod registry;
mod style;

pub use registry::StyleCatalog;
pub use style::{Category, FullTransformStyle, SingleStyle, Style, StyleMetadata};
