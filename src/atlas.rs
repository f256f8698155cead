pub mod labels;
pub mod loader;
