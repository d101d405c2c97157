//! Stage E: the sample assembler that ties the filter pipeline together.

pub mod assembler;

pub use assembler::{RawFix, SampleAssembler};
