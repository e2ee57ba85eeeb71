//!
//! Byte order of clip payloads.
//!

/// Byte order reversal of payload primitives.
pub trait SwapEndian {
    fn swap_endian(self) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    #[inline]
    pub fn native() -> Endian {
        return match cfg!(target_endian = "big") {
            true => Endian::Big,
            false => Endian::Little,
        };
    }

    /// Any non-zero header byte means little endian.
    #[inline]
    pub fn from_tag(tag: u8) -> Endian {
        return match tag {
            0 => Endian::Big,
            _ => Endian::Little,
        };
    }

    #[inline]
    pub fn tag(self) -> u8 {
        return match self {
            Endian::Big => 0,
            Endian::Little => 1,
        };
    }
}

macro_rules! swap_integer {
    ($($type:ty),*) => {
        $(
            impl SwapEndian for $type {
                #[inline]
                fn swap_endian(self) -> $type {
                    return self.swap_bytes();
                }
            }
        )*
    };
}

swap_integer!(u8, u16, i16, u32);

impl SwapEndian for f32 {
    #[inline]
    fn swap_endian(self) -> f32 {
        return f32::from_bits(self.to_bits().swap_bytes());
    }
}
