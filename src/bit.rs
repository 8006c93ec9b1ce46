#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bit {
    Bit8,
    Bit16,
    Bit32,
    Bit64,
}

impl Bit {
    pub fn from_size(size: usize) -> Option<Bit> {
        match size {
            1 => Some(Self::Bit8),
            2 => Some(Self::Bit16),
            4 => Some(Self::Bit32),
            8 => Some(Self::Bit64),
            _ => None,
        }
    }

    pub fn to_size(self) -> usize {
        match self {
            Self::Bit8 => 1,
            Self::Bit16 => 2,
            Self::Bit32 => 4,
            Self::Bit64 => 8,
        }
    }

    /// Load mnemonic. Sub-word signed loads sign-extend into the destination.
    pub fn load(self, signed: bool, wide_dst: bool) -> &'static str {
        match (self, signed) {
            (Self::Bit8, true) => "ldrsb",
            (Self::Bit8, false) => "ldrb",
            (Self::Bit16, true) => "ldrsh",
            (Self::Bit16, false) => "ldrh",
            (Self::Bit32, true) if wide_dst => "ldrsw",
            (Self::Bit32, _) | (Self::Bit64, _) => "ldr",
        }
    }

    pub fn store(self) -> &'static str {
        match self {
            Self::Bit8 => "strb",
            Self::Bit16 => "strh",
            Self::Bit32 | Self::Bit64 => "str",
        }
    }

    pub fn is_wide(self) -> bool {
        matches!(self, Self::Bit64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        for size in [1, 2, 4, 8] {
            assert_eq!(Bit::from_size(size).map(Bit::to_size), Some(size));
        }
        assert_eq!(Bit::from_size(0), None);
        assert_eq!(Bit::from_size(3), None);
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Bit::Bit8.load(true, false), "ldrsb");
        assert_eq!(Bit::Bit8.load(false, false), "ldrb");
        assert_eq!(Bit::Bit16.load(true, true), "ldrsh");
        assert_eq!(Bit::Bit32.load(true, false), "ldr");
        assert_eq!(Bit::Bit32.load(true, true), "ldrsw");
        assert_eq!(Bit::Bit32.load(false, true), "ldr");
        assert_eq!(Bit::Bit64.load(true, true), "ldr");
        assert_eq!(Bit::Bit8.store(), "strb");
        assert_eq!(Bit::Bit16.store(), "strh");
        assert_eq!(Bit::Bit64.store(), "str");
    }
}
