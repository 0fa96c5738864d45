// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Conversion between native signal values and the 64-bit word stream
//! carried by a channel payload.
//!
//! Narrow signals (up to 64 bits) always occupy one word. Wide signals are
//! stored by the model as 32-bit limbs, least significant first, and are
//! packed two limbs per word.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits per limb of a wide signal.
pub const LIMB_BITS: u32 = 32;

/// Width class of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    /// 1 to 64 bits, held in a single machine word.
    Narrow { bits: u8 },
    /// Any number of 32-bit limbs.
    Wide { limbs: usize },
}

/// Native storage container a width maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    U8,
    U16,
    U32,
    U64,
    Wide,
}

impl Width {
    /// Pick the width class for a signal of `bits` bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => None,
            1..=64 => Some(Width::Narrow { bits: bits as u8 }),
            _ => Some(Width::Wide {
                limbs: bits.div_ceil(LIMB_BITS) as usize,
            }),
        }
    }

    /// Declared width in bits. Wide signals report their full limb capacity.
    pub fn bits(&self) -> u64 {
        match *self {
            Width::Narrow { bits } => bits as u64,
            Width::Wide { limbs } => limbs as u64 * LIMB_BITS as u64,
        }
    }

    /// Number of 64-bit words `to_words` writes for this width.
    pub fn word_count(&self) -> usize {
        match *self {
            Width::Narrow { .. } => 1,
            Width::Wide { limbs } => limbs.div_ceil(2),
        }
    }

    pub fn container(&self) -> Container {
        match *self {
            Width::Narrow { bits } if bits <= 8 => Container::U8,
            Width::Narrow { bits } if bits <= 16 => Container::U16,
            Width::Narrow { bits } if bits <= 32 => Container::U32,
            Width::Narrow { .. } => Container::U64,
            Width::Wide { .. } => Container::Wide,
        }
    }

    fn narrow_mask(bits: u8) -> u64 {
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }
}

/// A signal value in the model's native layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeValue {
    Narrow(u64),
    /// 32-bit limbs, least significant first.
    Wide(Vec<u32>),
}

impl NativeValue {
    /// The all-zero value of `width`.
    pub fn zero(width: Width) -> Self {
        match width {
            Width::Narrow { .. } => NativeValue::Narrow(0),
            Width::Wide { limbs } => NativeValue::Wide(vec![0; limbs]),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            NativeValue::Narrow(v) => *v == 0,
            NativeValue::Wide(limbs) => limbs.iter().all(|l| *l == 0),
        }
    }

    /// Build a value of `width` from a `u64`, truncating to the width.
    pub fn from_u64(width: Width, value: u64) -> Self {
        match width {
            Width::Narrow { bits } => NativeValue::Narrow(value & Width::narrow_mask(bits)),
            Width::Wide { limbs } => {
                let mut out = vec![0u32; limbs];
                if limbs > 0 {
                    out[0] = value as u32;
                }
                if limbs > 1 {
                    out[1] = (value >> 32) as u32;
                }
                NativeValue::Wide(out)
            }
        }
    }

    /// Like `from_u64`, but bits above a narrow width are an error.
    fn from_u64_checked(width: Width, value: u64) -> Result<Self, MarshalError> {
        match Self::from_u64(width, value) {
            NativeValue::Narrow(masked) if masked != value => {
                Err(MarshalError::ValueTooWide { width })
            }
            v => Ok(v),
        }
    }

    /// Parse a decimal or `0x`-prefixed hexadecimal literal into a value of
    /// `width`. Underscores are accepted as digit separators.
    pub fn parse(width: Width, text: &str) -> Result<Self, MarshalError> {
        let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
        let invalid = || MarshalError::InvalidLiteral(text.to_string());

        let Some(hex) = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
        else {
            let value = cleaned.parse::<u64>().map_err(|_| invalid())?;
            return Self::from_u64_checked(width, value);
        };

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        // Walk 8 hex digits (one limb) at a time from the least significant end.
        let mut limbs = Vec::new();
        let mut end = hex.len();
        while end > 0 {
            let start = end.saturating_sub(8);
            let limb = u32::from_str_radix(&hex[start..end], 16).map_err(|_| invalid())?;
            limbs.push(limb);
            end = start;
        }

        match width {
            Width::Narrow { .. } => {
                if limbs.iter().skip(2).any(|l| *l != 0) {
                    return Err(MarshalError::ValueTooWide { width });
                }
                let value = limbs[0] as u64 | (limbs.get(1).copied().unwrap_or(0) as u64) << 32;
                Self::from_u64_checked(width, value)
            }
            Width::Wide { limbs: count } => {
                if limbs.len() > count && limbs[count..].iter().any(|l| *l != 0) {
                    return Err(MarshalError::ValueTooWide { width });
                }
                limbs.resize(count, 0);
                Ok(NativeValue::Wide(limbs))
            }
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Narrow(v) => write!(f, "{:#x}", v),
            NativeValue::Wide(limbs) => {
                write!(f, "0x")?;
                let mut digits = limbs.iter().rev().skip_while(|l| **l == 0);
                match digits.next() {
                    None => write!(f, "0"),
                    Some(top) => {
                        write!(f, "{:x}", top)?;
                        for limb in digits {
                            write!(f, "_{:08x}", limb)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("buffer holds {available} words but {needed} are required")]
    BufferTooShort { needed: usize, available: usize },
    #[error("value layout does not match signal width {width:?}")]
    WidthMismatch { width: Width },
    #[error("value does not fit in signal width {width:?}")]
    ValueTooWide { width: Width },
    #[error("invalid value literal '{0}'")]
    InvalidLiteral(String),
}

/// Write `value` into `out` as 64-bit words, returning the number of words
/// written. The count always equals `width.word_count()`.
pub fn to_words(width: Width, value: &NativeValue, out: &mut [u64]) -> Result<usize, MarshalError> {
    let needed = width.word_count();
    if out.len() < needed {
        return Err(MarshalError::BufferTooShort {
            needed,
            available: out.len(),
        });
    }

    match (width, value) {
        (Width::Narrow { bits }, NativeValue::Narrow(v)) => {
            out[0] = v & Width::narrow_mask(bits);
        }
        (Width::Wide { limbs }, NativeValue::Wide(data)) if data.len() == limbs => {
            for (word, pair) in out.iter_mut().zip(data.chunks(2)) {
                let lo = pair[0] as u64;
                let hi = pair.get(1).copied().unwrap_or(0) as u64;
                *word = lo | (hi << 32);
            }
        }
        _ => return Err(MarshalError::WidthMismatch { width }),
    }

    Ok(needed)
}

/// Read a value of `width` from the front of `words`. Narrow values are
/// masked to the declared width.
pub fn from_words(width: Width, words: &[u64]) -> Result<NativeValue, MarshalError> {
    let needed = width.word_count();
    if words.len() < needed {
        return Err(MarshalError::BufferTooShort {
            needed,
            available: words.len(),
        });
    }

    Ok(match width {
        Width::Narrow { bits } => NativeValue::Narrow(words[0] & Width::narrow_mask(bits)),
        Width::Wide { limbs } => {
            let mut data = Vec::with_capacity(limbs);
            for word in &words[..needed] {
                data.push(*word as u32);
                data.push((*word >> 32) as u32);
            }
            data.truncate(limbs);
            NativeValue::Wide(data)
        }
    })
}

/// Marshal an ordered list of signals contiguously into `out`.
pub fn pack_batch<'a, I>(items: I, out: &mut [u64]) -> Result<usize, MarshalError>
where
    I: IntoIterator<Item = (Width, &'a NativeValue)>,
{
    let mut offset = 0;
    for (width, value) in items {
        let start = offset.min(out.len());
        let written = to_words(width, value, &mut out[start..]).map_err(|e| match e {
            MarshalError::BufferTooShort { needed, available } => MarshalError::BufferTooShort {
                needed: start + needed,
                available: start + available,
            },
            other => other,
        })?;
        offset += written;
    }
    Ok(offset)
}

/// Inverse of [`pack_batch`].
pub fn unpack_batch<I>(widths: I, words: &[u64]) -> Result<Vec<NativeValue>, MarshalError>
where
    I: IntoIterator<Item = Width>,
{
    let mut offset = 0;
    let mut values = Vec::new();
    for width in widths {
        let value = from_words(width, &words[offset.min(words.len())..])?;
        offset += width.word_count();
        values.push(value);
    }
    Ok(values)
}

/// Total words needed to marshal all `widths` back to back.
pub fn batch_word_count<I>(widths: I) -> usize
where
    I: IntoIterator<Item = Width>,
{
    widths.into_iter().map(|w| w.word_count()).sum()
}
