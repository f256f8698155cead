pub mod components;
pub mod table;
pub mod threshold;
