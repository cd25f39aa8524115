use bitflags::bitflags;

bitflags! {
    /// Condition flags held in the high bits of `cpsr`, and produced by the
    /// compare instruction.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Flags: u32 {
        /// Negative: the signed result is below zero.
        const N = 1 << 31;
        /// Zero: the result is zero.
        const Z = 1 << 30;
        /// Carry: no borrow occurred (unsigned `a >= b`).
        const C = 1 << 29;
        /// Overflow: the signed result overflowed.
        const V = 1 << 28;
    }
}

impl Flags {
    /// Flags produced by comparing `a` against `b` as `a - b`.
    pub fn compare(a: u32, b: u32) -> Self {
        let diff = a.wrapping_sub(b);
        let (_, overflow) = (a as i32).overflowing_sub(b as i32);

        let mut flags = Flags::empty();
        flags.set(Flags::Z, diff == 0);
        flags.set(Flags::N, (diff as i32) < 0);
        flags.set(Flags::C, a >= b);
        flags.set(Flags::V, overflow);

        flags
    }
}

/// Condition-code selector of the conditional jump, over the `cpsr` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Condition {
    /// Equal: `Z`.
    EQ = 0,
    /// Not equal: `!Z`.
    NE = 1,
    /// Carry set (unsigned `>=`): `C`.
    CS = 2,
    /// Carry clear (unsigned `<`): `!C`.
    CC = 3,
    /// Minus: `N`.
    MI = 4,
    /// Plus: `!N`.
    PL = 5,
    /// Overflow set: `V`.
    VS = 6,
    /// Overflow clear: `!V`.
    VC = 7,
    /// Unsigned higher: `C && !Z`.
    HI = 8,
    /// Unsigned lower or same: `!C || Z`.
    LS = 9,
    /// Signed greater or equal: `N == V`.
    GE = 10,
    /// Signed less: `N != V`.
    LT = 11,
    /// Signed greater: `!Z && N == V`.
    GT = 12,
    /// Signed less or equal: `Z || N != V`.
    LE = 13,
    /// Always.
    AL = 14,
}

impl Condition {
    /// Whether the condition holds for the given flags.
    pub fn holds(&self, flags: Flags) -> bool {
        let n = flags.contains(Flags::N);
        let z = flags.contains(Flags::Z);
        let c = flags.contains(Flags::C);
        let v = flags.contains(Flags::V);

        match self {
            Condition::EQ => z,
            Condition::NE => !z,
            Condition::CS => c,
            Condition::CC => !c,
            Condition::MI => n,
            Condition::PL => !n,
            Condition::VS => v,
            Condition::VC => !v,
            Condition::HI => c && !z,
            Condition::LS => !c || z,
            Condition::GE => n == v,
            Condition::LT => n != v,
            Condition::GT => !z && n == v,
            Condition::LE => z || n != v,
            Condition::AL => true,
        }
    }
}

impl core::convert::TryFrom<u32> for Condition {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use Condition::*;

        let cond = match value {
            0 => EQ,
            1 => NE,
            2 => CS,
            3 => CC,
            4 => MI,
            5 => PL,
            6 => VS,
            7 => VC,
            8 => HI,
            9 => LS,
            10 => GE,
            11 => LT,
            12 => GT,
            13 => LE,
            14 => AL,
            _ => return Err(value),
        };

        Ok(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_equal_sets_zero_and_carry() {
        let flags = Flags::compare(42, 42);

        assert!(flags.contains(Flags::Z));
        assert!(flags.contains(Flags::C));
        assert!(!flags.contains(Flags::N));
    }

    #[test]
    fn compare_unsigned_borrow_clears_carry() {
        let flags = Flags::compare(1, 2);

        assert!(!flags.contains(Flags::C));
        assert!(flags.contains(Flags::N));
        assert!(!flags.contains(Flags::Z));
    }

    #[test]
    fn compare_signed_overflow() {
        // i32::MIN - 1 overflows
        let flags = Flags::compare(0x8000_0000, 1);

        assert!(flags.contains(Flags::V));
    }

    #[test]
    fn greater_than_condition() {
        assert!(Condition::GT.holds(Flags::compare(3, 2)));
        assert!(!Condition::GT.holds(Flags::compare(2, 2)));
        assert!(!Condition::GT.holds(Flags::compare(1, 2)));
        // signed comparison: -1 < 1
        assert!(!Condition::GT.holds(Flags::compare(0xffff_ffff, 1)));
    }

    #[test]
    fn always_holds() {
        assert!(Condition::AL.holds(Flags::empty()));
        assert!(Condition::AL.holds(Flags::all()));
    }
}
