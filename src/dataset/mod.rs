//! Dataset descriptors.
//!
//! A [`Dataset`] names one grid and owns its backing buffer. The caller creates
//! descriptors before an invocation and gets them back afterwards; the engine
//! only reads inputs and writes the output buffer in place.

pub mod table;

pub use table::{DatasetTable, TableEntry};

use crate::config::types::{Result, UdfError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type tag. Closed set of the numeric types a grid may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
}

impl ElementType {
    pub const ALL: [ElementType; 10] = [
        ElementType::Int8,
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::Uint8,
        ElementType::Uint16,
        ElementType::Uint32,
        ElementType::Uint64,
        ElementType::Float,
        ElementType::Double,
    ];

    /// Canonical name handed to UDFs (`getType`)
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
            ElementType::Float => "float",
            ElementType::Double => "double",
        }
    }

    /// C pointer declaration used by templates to cast raw buffers
    pub fn cast_declaration(self) -> &'static str {
        match self {
            ElementType::Int8 => "int8_t*",
            ElementType::Int16 => "int16_t*",
            ElementType::Int32 => "int32_t*",
            ElementType::Int64 => "int64_t*",
            ElementType::Uint8 => "uint8_t*",
            ElementType::Uint16 => "uint16_t*",
            ElementType::Uint32 => "uint32_t*",
            ElementType::Uint64 => "uint64_t*",
            ElementType::Float => "float*",
            ElementType::Double => "double*",
        }
    }

    /// Storage size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Double => 8,
        }
    }

    /// Parse a type name; accepts `float32`/`float64` as aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float32" => return Some(ElementType::Float),
            "float64" => return Some(ElementType::Double),
            _ => {}
        }
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust types that can view a grid buffer.
pub trait Element: sealed::Sealed + Copy + Default + 'static {
    const TYPE: ElementType;
}

macro_rules! element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$tag;
            }
        )*
    };
}

element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
}

/// Zero-initialized byte buffer with 8-byte alignment, so any element type can
/// be viewed in place.
#[derive(Clone, Default)]
pub struct GridBuffer {
    words: Vec<u64>,
    len: usize,
}

impl GridBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialized bytes and u8 has no alignment needs.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the mutable borrow of self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }
}

impl fmt::Debug for GridBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridBuffer").field("len", &self.len).finish()
    }
}

/// One named grid: name, element type, shape and backing storage.
#[derive(Clone, Debug)]
pub struct Dataset {
    name: String,
    element_type: ElementType,
    shape: Vec<u64>,
    buffer: GridBuffer,
}

impl Dataset {
    /// Create a descriptor with a zero-filled buffer of `product(shape) × element_size` bytes
    pub fn new(name: impl Into<String>, element_type: ElementType, shape: Vec<u64>) -> Result<Self> {
        let name = name.into();
        let bytes = grid_size_of(&shape)
            .and_then(|n| n.checked_mul(element_type.size() as u64))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                UdfError::Dataset(format!("dataset {name}: shape {shape:?} overflows addressable memory"))
            })?;

        Ok(Self {
            name,
            element_type,
            shape,
            buffer: GridBuffer::zeroed(bytes),
        })
    }

    /// Create a descriptor holding `values`; the element type follows `T`
    pub fn from_values<T: Element>(name: impl Into<String>, shape: Vec<u64>, values: &[T]) -> Result<Self> {
        let mut dataset = Self::new(name, T::TYPE, shape)?;
        if values.len() != dataset.grid_size() {
            return Err(UdfError::Dataset(format!(
                "dataset {}: {} values do not fill a {} grid",
                dataset.name,
                values.len(),
                dataset.dims_text()
            )));
        }
        dataset.values_mut::<T>()?.copy_from_slice(values);
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Number of elements; a scalar (empty shape) has one
    pub fn grid_size(&self) -> usize {
        self.buffer.len() / self.element_type.size()
    }

    pub fn storage_size(&self) -> usize {
        self.element_type.size()
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// Dimensions as text, e.g. `2x2`
    pub fn dims_text(&self) -> String {
        dims_text(&self.shape)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_bytes_mut()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr()
    }

    /// Typed view of the grid. Fails when `T` does not match the element type.
    pub fn values<T: Element>(&self) -> Result<&[T]> {
        self.check_type::<T>()?;
        // SAFETY: the buffer is 8-byte aligned, holds grid_size() elements of T,
        // and every bit pattern is a valid value of the numeric element types.
        Ok(unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const T, self.grid_size()) })
    }

    pub fn values_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_type::<T>()?;
        let len = self.grid_size();
        // SAFETY: see `values`; exclusivity comes from &mut self.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.buffer.as_mut_ptr() as *mut T, len) })
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::TYPE != self.element_type {
            return Err(UdfError::Dataset(format!(
                "dataset {} holds {}, not {}",
                self.name, self.element_type, T::TYPE
            )));
        }
        Ok(())
    }
}

fn grid_size_of(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

pub(crate) fn dims_text(shape: &[u64]) -> String {
    if shape.is_empty() {
        return "1".to_string();
    }
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_names_round_trip() {
        for ty in ElementType::ALL {
            assert_eq!(ElementType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ElementType::from_name("float64"), Some(ElementType::Double));
        assert_eq!(ElementType::from_name("complex"), None);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::Int8.size(), 1);
        assert_eq!(ElementType::Uint16.size(), 2);
        assert_eq!(ElementType::Float.size(), 4);
        assert_eq!(ElementType::Double.size(), 8);
        assert_eq!(ElementType::Int32.cast_declaration(), "int32_t*");
    }

    #[test]
    fn buffer_is_sized_from_shape() {
        let ds = Dataset::new("C", ElementType::Int32, vec![2, 3]).unwrap();
        assert_eq!(ds.grid_size(), 6);
        assert_eq!(ds.byte_len(), 24);
        assert_eq!(ds.dims_text(), "2x3");
        assert!(ds.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn scalar_shape_has_one_element() {
        let ds = Dataset::new("s", ElementType::Double, vec![]).unwrap();
        assert_eq!(ds.grid_size(), 1);
        assert_eq!(ds.dims_text(), "1");
    }

    #[test]
    fn typed_views_check_the_tag() {
        let mut ds = Dataset::from_values("A", vec![2, 2], &[1i32, 2, 3, 4]).unwrap();
        assert_eq!(ds.values::<i32>().unwrap(), &[1, 2, 3, 4]);
        assert!(ds.values::<f32>().is_err());
        ds.values_mut::<i32>().unwrap()[3] = 40;
        assert_eq!(ds.values::<i32>().unwrap()[3], 40);
    }

    #[test]
    fn from_values_rejects_wrong_length() {
        let err = Dataset::from_values("A", vec![2, 2], &[1.0f64, 2.0]).unwrap_err();
        assert!(matches!(err, UdfError::Dataset(_)));
    }

    #[test]
    fn oversized_shape_is_rejected() {
        assert!(Dataset::new("huge", ElementType::Int64, vec![u64::MAX, 2]).is_err());
    }
}
