pub mod document;
pub mod path;

pub use document::Document;
pub use path::{Step, TargetPath};
