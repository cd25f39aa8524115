//! Architectural register names.
//!
//! The register file holds [`COUNT`] words. `sp`, `lr` and `cpsr` are plain
//! entries in the file; the general-purpose set `r0..r9` is a contiguous
//! slice starting at [`GP_BASE`]. The program counter is not part of the
//! file.

use crate::RegisterId;

/// Number of registers in the file.
pub const COUNT: usize = 256;

/// Stack pointer.
pub const SP: RegisterId = 0x0d;

/// Link register.
pub const LR: RegisterId = 0x0e;

/// Status register carrying the condition flags.
pub const CPSR: RegisterId = 0x0f;

/// First general-purpose register; `r0..r9` are `GP_BASE..GP_BASE + GP_COUNT`.
pub const GP_BASE: RegisterId = 0x10;

/// Number of general-purpose registers.
pub const GP_COUNT: usize = 10;

/// Register file index of `rN`.
pub const fn r(n: usize) -> RegisterId {
    GP_BASE + n
}

/// Architectural name of a register, if it has one.
pub fn name(id: RegisterId) -> Option<String> {
    match id {
        SP => Some("sp".into()),
        LR => Some("lr".into()),
        CPSR => Some("cpsr".into()),
        _ if (GP_BASE..GP_BASE + GP_COUNT).contains(&id) => Some(format!("r{}", id - GP_BASE)),
        _ => None,
    }
}

/// Display form: the architectural name, or the raw index for unnamed
/// registers.
pub fn display(id: RegisterId) -> String {
    name(id).unwrap_or_else(|| format!("x{id}"))
}

/// Parse an architectural register name. `pc` is not accepted: it is not
/// part of the register file.
pub fn parse(text: &str) -> Option<RegisterId> {
    let text = text.to_ascii_lowercase();

    match text.as_str() {
        "sp" => Some(SP),
        "lr" => Some(LR),
        "cpsr" => Some(CPSR),
        _ => {
            let n: usize = text.strip_prefix('r')?.parse().ok()?;
            (n < GP_COUNT).then(|| r(n))
        }
    }
}
