//! Element kinds and the conversion shim
//!
//! Every format stores samples in one native kind (int32, float32 or
//! float64). Callers may ask for any of the three; when the kinds differ a
//! converter is bound on the handle that runs the native codec into a
//! scratch buffer and converts element-wise.
//!
//! Conversions go through `f64`, which holds every `i32` and `f32` exactly.
//! Float to int rounds half away from zero and saturates; NaN becomes 0.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Int32,
    Float32,
    Float64,
}

impl ElementKind {
    pub const ALL: [ElementKind; 3] = [ElementKind::Int32, ElementKind::Float32, ElementKind::Float64];

    pub(crate) fn index(self) -> usize {
        match self {
            ElementKind::Int32 => 0,
            ElementKind::Float32 => 1,
            ElementKind::Float64 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Int32 => "int32",
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only view of samples in some element kind
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    Int32(&'a [i32]),
    Float32(&'a [f32]),
    Float64(&'a [f64]),
}

/// Writable view of samples in some element kind
#[derive(Debug)]
pub enum SamplesMut<'a> {
    Int32(&'a mut [i32]),
    Float32(&'a mut [f32]),
    Float64(&'a mut [f64]),
}

impl<'a> Samples<'a> {
    pub fn kind(&self) -> ElementKind {
        match self {
            Samples::Int32(_) => ElementKind::Int32,
            Samples::Float32(_) => ElementKind::Float32,
            Samples::Float64(_) => ElementKind::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::Int32(s) => s.len(),
            Samples::Float32(s) => s.len(),
            Samples::Float64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> SamplesMut<'a> {
    pub fn kind(&self) -> ElementKind {
        match self {
            SamplesMut::Int32(_) => ElementKind::Int32,
            SamplesMut::Float32(_) => ElementKind::Float32,
            SamplesMut::Float64(_) => ElementKind::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SamplesMut::Int32(s) => s.len(),
            SamplesMut::Float32(s) => s.len(),
            SamplesMut::Float64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill from `src`, converting element-wise; lengths must match
    pub fn fill_from(&mut self, src: Samples<'_>) {
        match self {
            SamplesMut::Int32(dst) => convert_into(src, &mut **dst),
            SamplesMut::Float32(dst) => convert_into(src, &mut **dst),
            SamplesMut::Float64(dst) => convert_into(src, &mut **dst),
        }
    }
}

/// Types a caller can read and write samples as
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
    const KIND: ElementKind;

    fn samples(buf: &[Self]) -> Samples<'_>;

    fn samples_mut(buf: &mut [Self]) -> SamplesMut<'_>;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

impl Element for i32 {
    const KIND: ElementKind = ElementKind::Int32;

    fn samples(buf: &[Self]) -> Samples<'_> {
        Samples::Int32(buf)
    }

    fn samples_mut(buf: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::Int32(buf)
    }

    fn from_f64(value: f64) -> Self {
        // `as` saturates and maps NaN to 0; round() is half-away-from-zero
        value.round() as i32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::Float32;

    fn samples(buf: &[Self]) -> Samples<'_> {
        Samples::Float32(buf)
    }

    fn samples_mut(buf: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::Float32(buf)
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f64 {
    const KIND: ElementKind = ElementKind::Float64;

    fn samples(buf: &[Self]) -> Samples<'_> {
        Samples::Float64(buf)
    }

    fn samples_mut(buf: &mut [Self]) -> SamplesMut<'_> {
        SamplesMut::Float64(buf)
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

fn cast<S: Element, D: Element>(src: &[S], dst: &mut [D]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = D::from_f64(s.to_f64());
    }
}

/// Convert `src` element-wise into `dst`
pub fn convert_into<D: Element>(src: Samples<'_>, dst: &mut [D]) {
    debug_assert_eq!(src.len(), dst.len());
    match src {
        Samples::Int32(s) => cast(s, dst),
        Samples::Float32(s) => cast(s, dst),
        Samples::Float64(s) => cast(s, dst),
    }
}

/// How requests of one element kind reach the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    /// Nothing installed yet
    #[default]
    Unbound,
    /// Caller kind equals the native kind
    Native,
    /// Shim through a scratch buffer of the given native kind
    Converted(ElementKind),
}

impl Binding {
    pub fn for_kinds(requested: ElementKind, native: ElementKind) -> Self {
        if requested == native {
            Binding::Native
        } else {
            Binding::Converted(native)
        }
    }
}

/// Reusable intermediate buffers for the conversion shim
#[derive(Debug, Default)]
pub struct Scratch {
    ints: Vec<i32>,
    floats: Vec<f32>,
    doubles: Vec<f64>,
}

impl Scratch {
    /// Writable scratch of `kind`, exactly `len` elements
    pub fn buf_mut(&mut self, kind: ElementKind, len: usize) -> SamplesMut<'_> {
        match kind {
            ElementKind::Int32 => {
                self.ints.resize(len, 0);
                SamplesMut::Int32(&mut self.ints[..len])
            }
            ElementKind::Float32 => {
                self.floats.resize(len, 0.0);
                SamplesMut::Float32(&mut self.floats[..len])
            }
            ElementKind::Float64 => {
                self.doubles.resize(len, 0.0);
                SamplesMut::Float64(&mut self.doubles[..len])
            }
        }
    }

    /// View the first `len` elements last written through [`Scratch::buf_mut`]
    pub fn view(&self, kind: ElementKind, len: usize) -> Samples<'_> {
        match kind {
            ElementKind::Int32 => Samples::Int32(&self.ints[..len]),
            ElementKind::Float32 => Samples::Float32(&self.floats[..len]),
            ElementKind::Float64 => Samples::Float64(&self.doubles[..len]),
        }
    }

    /// Fill a scratch buffer of `kind` from caller data
    pub fn load<T: Element>(&mut self, kind: ElementKind, src: &[T]) -> Samples<'_> {
        let len = src.len();
        self.buf_mut(kind, len).fill_from(T::samples(src));
        self.view(kind, len)
    }

    /// Drop scratch storage
    pub fn clear(&mut self) {
        self.ints = Vec::new();
        self.floats = Vec::new();
        self.doubles = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_int_rounds_half_away_from_zero() {
        let src = [0.5f64, 1.5, 2.5, -0.5, -1.5, 2.4, -2.6];
        let mut dst = [0i32; 7];
        convert_into(Samples::Float64(&src), &mut dst);
        assert_eq!(dst, [1, 2, 3, -1, -2, 2, -3]);
    }

    #[test]
    fn test_float_to_int_saturates() {
        let src = [1e12f64, -1e12, f64::NAN];
        let mut dst = [7i32; 3];
        convert_into(Samples::Float64(&src), &mut dst);
        assert_eq!(dst, [i32::MAX, i32::MIN, 0]);
    }

    #[test]
    fn test_int_to_double_is_exact() {
        let src = [i32::MIN, -1, 0, 1, i32::MAX];
        let mut dst = [0f64; 5];
        convert_into(Samples::Int32(&src), &mut dst);
        assert_eq!(dst, [i32::MIN as f64, -1.0, 0.0, 1.0, i32::MAX as f64]);

        let mut back = [0i32; 5];
        convert_into(Samples::Float64(&dst), &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn test_int_to_float_exact_below_2_pow_24() {
        let src = [16_777_216i32, -16_777_216, 12345];
        let mut dst = [0f32; 3];
        convert_into(Samples::Int32(&src), &mut dst);
        assert_eq!(dst, [16_777_216.0, -16_777_216.0, 12345.0]);
    }

    #[test]
    fn test_binding_for_kinds() {
        assert_eq!(
            Binding::for_kinds(ElementKind::Int32, ElementKind::Int32),
            Binding::Native
        );
        assert_eq!(
            Binding::for_kinds(ElementKind::Float64, ElementKind::Int32),
            Binding::Converted(ElementKind::Int32)
        );
        assert_eq!(Binding::default(), Binding::Unbound);
    }

    #[test]
    fn test_scratch_load_and_view() {
        let mut scratch = Scratch::default();
        let view = scratch.load(ElementKind::Int32, &[1.4f64, 2.6, -3.5]);
        match view {
            Samples::Int32(v) => assert_eq!(v, &[1, 3, -4]),
            other => panic!("unexpected kind {:?}", other.kind()),
        }

        // Shrinking requests see only their own length
        scratch.buf_mut(ElementKind::Int32, 1);
        assert_eq!(scratch.view(ElementKind::Int32, 1).len(), 1);
    }
}
