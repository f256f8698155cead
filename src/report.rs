pub mod builder;
pub mod html;
pub mod render;
