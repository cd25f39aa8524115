//! Program loaders: the native assembly dialect and ELF32 relocatable
//! objects with optional DWARF debug info.
//!
//! Both loaders produce an unresolved [`crate::program::ProgramFile`]; the
//! [`crate::resolver`] assigns addresses afterwards.

mod assembly;
mod dwarf;
mod elf;

pub use assembly::{parse_assembly_file, parse_assembly_source};
pub use elf::{parse_object_bytes, parse_object_file};
