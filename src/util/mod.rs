pub mod arena;
pub mod coding;
pub mod hash;
