pub mod caption;
pub mod mapping;
pub mod sft;
pub mod text;
