//! Typed values carried by replicated variables.

use serde::{Deserialize, Serialize};

use crate::{
    codec::{CodecError, PacketReader, PacketWriter},
    math::{Lerp, Vec2},
};

/// Wire representation of a replicated variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Vec2,
}

impl WireType {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            WireType::U8 | WireType::I8 | WireType::Bool => 1,
            WireType::U16 | WireType::I16 => 2,
            WireType::U32 | WireType::I32 | WireType::F32 => 4,
            WireType::U64 | WireType::I64 | WireType::F64 | WireType::Vec2 => 8,
        }
    }

    /// Whether samples of this type can be blended.
    pub const fn is_interpolable(self) -> bool {
        !matches!(self, WireType::Bool)
    }
}

/// A decoded variable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Vec2(Vec2),
}

impl WireValue {
    /// Zero value of a wire type.
    pub const fn default_for(wire: WireType) -> Self {
        match wire {
            WireType::U8 => WireValue::U8(0),
            WireType::U16 => WireValue::U16(0),
            WireType::U32 => WireValue::U32(0),
            WireType::U64 => WireValue::U64(0),
            WireType::I8 => WireValue::I8(0),
            WireType::I16 => WireValue::I16(0),
            WireType::I32 => WireValue::I32(0),
            WireType::I64 => WireValue::I64(0),
            WireType::F32 => WireValue::F32(0.0),
            WireType::F64 => WireValue::F64(0.0),
            WireType::Bool => WireValue::Bool(false),
            WireType::Vec2 => WireValue::Vec2(Vec2::ZERO),
        }
    }

    pub const fn wire_type(&self) -> WireType {
        match self {
            WireValue::U8(_) => WireType::U8,
            WireValue::U16(_) => WireType::U16,
            WireValue::U32(_) => WireType::U32,
            WireValue::U64(_) => WireType::U64,
            WireValue::I8(_) => WireType::I8,
            WireValue::I16(_) => WireType::I16,
            WireValue::I32(_) => WireType::I32,
            WireValue::I64(_) => WireType::I64,
            WireValue::F32(_) => WireType::F32,
            WireValue::F64(_) => WireType::F64,
            WireValue::Bool(_) => WireType::Bool,
            WireValue::Vec2(_) => WireType::Vec2,
        }
    }

    pub fn read(wire: WireType, r: &mut PacketReader) -> Result<Self, CodecError> {
        Ok(match wire {
            WireType::U8 => WireValue::U8(r.read_u8()?),
            WireType::U16 => WireValue::U16(r.read_u16()?),
            WireType::U32 => WireValue::U32(r.read_u32()?),
            WireType::U64 => WireValue::U64(r.read_u64()?),
            WireType::I8 => WireValue::I8(r.read_i8()?),
            WireType::I16 => WireValue::I16(r.read_i16()?),
            WireType::I32 => WireValue::I32(r.read_i32()?),
            WireType::I64 => WireValue::I64(r.read_i64()?),
            WireType::F32 => WireValue::F32(r.read_f32()?),
            WireType::F64 => WireValue::F64(r.read_f64()?),
            WireType::Bool => WireValue::Bool(r.read_bool()?),
            WireType::Vec2 => WireValue::Vec2(r.read_vec2()?),
        })
    }

    pub fn write(&self, w: &mut PacketWriter) {
        match *self {
            WireValue::U8(v) => w.write_u8(v),
            WireValue::U16(v) => w.write_u16(v),
            WireValue::U32(v) => w.write_u32(v),
            WireValue::U64(v) => w.write_u64(v),
            WireValue::I8(v) => w.write_i8(v),
            WireValue::I16(v) => w.write_i16(v),
            WireValue::I32(v) => w.write_i32(v),
            WireValue::I64(v) => w.write_i64(v),
            WireValue::F32(v) => w.write_f32(v),
            WireValue::F64(v) => w.write_f64(v),
            WireValue::Bool(v) => w.write_bool(v),
            WireValue::Vec2(v) => w.write_vec2(v),
        }
    }

    /// Scalar view of numeric values. `None` for bools and vectors.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            WireValue::U8(v) => Some(f64::from(v)),
            WireValue::U16(v) => Some(f64::from(v)),
            WireValue::U32(v) => Some(f64::from(v)),
            WireValue::U64(v) => Some(v as f64),
            WireValue::I8(v) => Some(f64::from(v)),
            WireValue::I16(v) => Some(f64::from(v)),
            WireValue::I32(v) => Some(f64::from(v)),
            WireValue::I64(v) => Some(v as f64),
            WireValue::F32(v) => Some(f64::from(v)),
            WireValue::F64(v) => Some(v),
            WireValue::Bool(_) | WireValue::Vec2(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            WireValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match *self {
            WireValue::Vec2(v) => Some(v),
            _ => None,
        }
    }

    /// Exact view of integer values, wide enough for every integer type.
    fn as_integer(&self) -> Option<i128> {
        match *self {
            WireValue::U8(v) => Some(i128::from(v)),
            WireValue::U16(v) => Some(i128::from(v)),
            WireValue::U32(v) => Some(i128::from(v)),
            WireValue::U64(v) => Some(i128::from(v)),
            WireValue::I8(v) => Some(i128::from(v)),
            WireValue::I16(v) => Some(i128::from(v)),
            WireValue::I32(v) => Some(i128::from(v)),
            WireValue::I64(v) => Some(i128::from(v)),
            _ => None,
        }
    }

    /// Rebuilds an integer value of `wire` type, saturating at its bounds.
    /// `None` for non-integer types.
    fn from_integer(wire: WireType, v: i128) -> Option<Self> {
        fn sat<T: TryFrom<i128>>(v: i128, min: T, max: T) -> T {
            T::try_from(v).unwrap_or(if v < 0 { min } else { max })
        }
        Some(match wire {
            WireType::U8 => WireValue::U8(sat(v, u8::MIN, u8::MAX)),
            WireType::U16 => WireValue::U16(sat(v, u16::MIN, u16::MAX)),
            WireType::U32 => WireValue::U32(sat(v, u32::MIN, u32::MAX)),
            WireType::U64 => WireValue::U64(sat(v, u64::MIN, u64::MAX)),
            WireType::I8 => WireValue::I8(sat(v, i8::MIN, i8::MAX)),
            WireType::I16 => WireValue::I16(sat(v, i16::MIN, i16::MAX)),
            WireType::I32 => WireValue::I32(sat(v, i32::MIN, i32::MAX)),
            WireType::I64 => WireValue::I64(sat(v, i64::MIN, i64::MAX)),
            _ => return None,
        })
    }
}

impl Lerp for WireValue {
    /// Integers blend exactly and round to nearest; floats blend in `f64`;
    /// vectors blend component-wise. Values that cannot blend (bools,
    /// mismatched types) step at `t = 0.5`.
    fn lerp(&self, to: &Self, t: f64) -> Self {
        if self.wire_type() != to.wire_type() {
            return step(self, to, t);
        }
        match (*self, *to) {
            (WireValue::Vec2(a), WireValue::Vec2(b)) => WireValue::Vec2(Lerp::lerp(&a, &b, t)),
            (WireValue::F32(a), WireValue::F32(b)) => WireValue::F32(Lerp::lerp(&a, &b, t)),
            (WireValue::F64(a), WireValue::F64(b)) => WireValue::F64(Lerp::lerp(&a, &b, t)),
            _ => match (self.as_integer(), to.as_integer()) {
                (Some(a), Some(b)) => {
                    let t = t.clamp(0.0, 1.0);
                    // the offset is at most |b - a|, so the sum stays in range
                    let offset = ((b - a) as f64 * t).round() as i128;
                    let blended = (a + offset).clamp(a.min(b), a.max(b));
                    WireValue::from_integer(self.wire_type(), blended).unwrap_or(*to)
                }
                _ => step(self, to, t),
            },
        }
    }
}

fn step(from: &WireValue, to: &WireValue, t: f64) -> WireValue {
    if t < 0.5 {
        *from
    } else {
        *to
    }
}
