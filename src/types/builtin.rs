use serde::{Deserialize, Serialize};

use super::error::TypeError;

/// Operand width carried by every load, store and arithmetic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BitWidth {
    W8,
    W16,
    W32,
    W64,
}

impl BitWidth {
    pub fn bytes(self) -> u32 {
        match self {
            BitWidth::W8 => 1,
            BitWidth::W16 => 2,
            BitWidth::W32 => 4,
            BitWidth::W64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    pub fn from_size(size: u32) -> Option<Self> {
        match size {
            1 => Some(BitWidth::W8),
            2 => Some(BitWidth::W16),
            4 => Some(BitWidth::W32),
            8 => Some(BitWidth::W64),
            _ => None,
        }
    }

    /// All ones in the low `bits()` bits.
    pub fn mask(self) -> u64 {
        match self {
            BitWidth::W64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    /// Reinterpret the low bits of `raw` as a signed value of this width.
    pub fn sign_extend(self, raw: u64) -> i64 {
        let shift = 64 - self.bits();
        ((raw << shift) as i64) >> shift
    }

    pub fn truncate(self, raw: u64) -> u64 {
        raw & self.mask()
    }

    pub fn signed_range(self) -> (i64, i64) {
        match self {
            BitWidth::W64 => (i64::MIN, i64::MAX),
            other => {
                let half = 1i64 << (other.bits() - 1);
                (-half, half - 1)
            }
        }
    }
}

impl std::fmt::Display for BitWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Classification used by the binary-operator type checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    UnsignedInteger,
    SignedInteger,
    Float,
}

/// Scalar types native to the bytecode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinType {
    Void,
    Any,
    U8,
    I8,
    /// UTF-16 code unit.
    Char,
    I16,
    U16,
    U32,
    I32,
    U64,
    I64,
    F32,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 12] = [
        BuiltinType::Void,
        BuiltinType::Any,
        BuiltinType::U8,
        BuiltinType::I8,
        BuiltinType::Char,
        BuiltinType::I16,
        BuiltinType::U16,
        BuiltinType::U32,
        BuiltinType::I32,
        BuiltinType::U64,
        BuiltinType::I64,
        BuiltinType::F32,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Void => "void",
            BuiltinType::Any => "any",
            BuiltinType::U8 => "u8",
            BuiltinType::I8 => "i8",
            BuiltinType::Char => "char",
            BuiltinType::I16 => "i16",
            BuiltinType::U16 => "u16",
            BuiltinType::U32 => "u32",
            BuiltinType::I32 => "i32",
            BuiltinType::U64 => "u64",
            BuiltinType::I64 => "i64",
            BuiltinType::F32 => "f32",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn size(self) -> Result<u32, TypeError> {
        match self {
            BuiltinType::Void | BuiltinType::Any => Err(TypeError::unsized_type(self.name())),
            BuiltinType::U8 | BuiltinType::I8 => Ok(1),
            BuiltinType::Char | BuiltinType::I16 | BuiltinType::U16 => Ok(2),
            BuiltinType::U32 | BuiltinType::I32 | BuiltinType::F32 => Ok(4),
            BuiltinType::U64 | BuiltinType::I64 => Ok(8),
        }
    }

    pub fn bit_width(self) -> Result<BitWidth, TypeError> {
        let size = self.size()?;
        BitWidth::from_size(size).ok_or_else(|| TypeError::NoBitWidth(self.name().to_string()))
    }

    pub fn numeric_type(self) -> Option<NumericType> {
        match self {
            BuiltinType::Void | BuiltinType::Any => None,
            BuiltinType::U8
            | BuiltinType::Char
            | BuiltinType::U16
            | BuiltinType::U32
            | BuiltinType::U64 => Some(NumericType::UnsignedInteger),
            BuiltinType::I8 | BuiltinType::I16 | BuiltinType::I32 | BuiltinType::I64 => {
                Some(NumericType::SignedInteger)
            }
            BuiltinType::F32 => Some(NumericType::Float),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self.numeric_type(),
            Some(NumericType::SignedInteger | NumericType::UnsignedInteger)
        )
    }

    pub fn is_signed(self) -> bool {
        self.numeric_type() == Some(NumericType::SignedInteger)
    }

    /// The integer builtin with the given width and signedness.
    pub fn integer(width: BitWidth, signed: bool) -> Self {
        match (width, signed) {
            (BitWidth::W8, true) => BuiltinType::I8,
            (BitWidth::W8, false) => BuiltinType::U8,
            (BitWidth::W16, true) => BuiltinType::I16,
            (BitWidth::W16, false) => BuiltinType::U16,
            (BitWidth::W32, true) => BuiltinType::I32,
            (BitWidth::W32, false) => BuiltinType::U32,
            (BitWidth::W64, true) => BuiltinType::I64,
            (BitWidth::W64, false) => BuiltinType::U64,
        }
    }
}

impl std::fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
