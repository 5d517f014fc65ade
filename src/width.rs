#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    W128,
}

impl std::fmt::Display for Width {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Width::W8 => write!(f, "Width8"),
            Width::W16 => write!(f, "Width16"),
            Width::W32 => write!(f, "Width32"),
            Width::W64 => write!(f, "Width64"),
            Width::W128 => write!(f, "Width128"),
        }
    }
}

pub const fn bytes_for_width(width: Width) -> usize {
    match width {
        Width::W8 => 1,
        Width::W16 => 2,
        Width::W32 => 4,
        Width::W64 => 8,
        Width::W128 => 16,
    }
}

/// Narrowest width whose high bits are all zero once `value` is materialized into a register.
/// Only values that also stay non-negative when read back as a signed number of that width count,
/// and negative values need all 64 bits.
pub const fn width_for_immediate(value: i64) -> Width {
    if value < 0 {
        Width::W64
    } else if value <= i8::MAX as i64 {
        Width::W8
    } else if value <= i16::MAX as i64 {
        Width::W16
    } else if value <= i32::MAX as i64 {
        Width::W32
    } else {
        Width::W64
    }
}
