//! Variables are memory mapped when first touched and shared until evicted.

pub mod cache;
pub mod cached;
pub mod field;
pub mod mmap;
