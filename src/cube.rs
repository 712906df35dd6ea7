//! Generic 3-D data cube
//!
//! A dense numeric array over two spatial axes and one spectral axis, with
//! bounds-checked voxel access, running minimum/maximum tracking and an
//! attached [`MetaData`] header. The backing storage is either owned or a
//! non-owning view over externally supplied memory.

use ndarray::{ArrayView3, CowArray, Ix3};
use num_traits::{FromPrimitive, ToPrimitive, Zero};
use thiserror::Error;

use crate::metadata::MetaData;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CubeError {
    #[error("cube dimensions must all be at least 1, got ({0}, {1}, {2})")]
    EmptyDimension(usize, usize, usize),
    #[error("data length {actual} does not match cube size {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("voxel ({0}, {1}, {2}) is outside the cube")]
    OutOfRange(usize, usize, usize),
}

/// Element-type tag, mirroring the FITS `BITPIX` convention
/// (positive for integers, negative for IEEE floats)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ElementKind {
    pub fn bitpix(self) -> i32 {
        match self {
            ElementKind::Int8 => 8,
            ElementKind::Int16 => 16,
            ElementKind::Int32 => 32,
            ElementKind::Int64 => 64,
            ElementKind::Float32 => -32,
            ElementKind::Float64 => -64,
        }
    }
}

/// Numeric scalar usable as a cube element
pub trait CubeElement:
    Copy + PartialOrd + Zero + ToPrimitive + FromPrimitive + 'static
{
    const KIND: ElementKind;

    /// Sentinel returned for out-of-range reads: NaN where the type has
    /// one, zero otherwise
    fn not_found() -> Self;
}

macro_rules! impl_int_element {
    ($type:ty, $kind:expr) => {
        impl CubeElement for $type {
            const KIND: ElementKind = $kind;

            fn not_found() -> Self {
                0
            }
        }
    };
}

macro_rules! impl_float_element {
    ($type:ty, $kind:expr) => {
        impl CubeElement for $type {
            const KIND: ElementKind = $kind;

            fn not_found() -> Self {
                <$type>::NAN
            }
        }
    };
}

impl_int_element!(i8, ElementKind::Int8);
impl_int_element!(i16, ElementKind::Int16);
impl_int_element!(i32, ElementKind::Int32);
impl_int_element!(i64, ElementKind::Int64);
impl_float_element!(f32, ElementKind::Float32);
impl_float_element!(f64, ElementKind::Float64);

/// Dense 3-D array indexed as `(x, y, z)` with `z` the spectral axis.
///
/// # Examples
/// ```
/// use parametrizer::cube::Cube;
///
/// let mut cube = Cube::<f32>::zeros(4, 4, 2).unwrap();
/// cube.set(1, 2, 0, 7.5).unwrap();
/// assert_eq!(cube.get(1, 2, 0), 7.5);
/// assert!(cube.get(9, 9, 9).is_nan());
/// ```
#[derive(Debug, Clone)]
pub struct Cube<'a, T: CubeElement> {
    data: CowArray<'a, T, Ix3>,
    header: MetaData,
    data_min: Option<T>,
    data_max: Option<T>,
}

impl<T: CubeElement> Cube<'static, T> {
    /// Zero-filled owned cube; all dimensions must be at least 1
    pub fn zeros(nx: usize, ny: usize, nz: usize) -> Result<Self, CubeError> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(CubeError::EmptyDimension(nx, ny, nz));
        }
        let data = CowArray::from(ndarray::Array3::zeros((nx, ny, nz)));
        Ok(Self::wrap(data))
    }

    /// Owned cube taking ownership of `data`, laid out with `z` fastest
    pub fn from_vec(nx: usize, ny: usize, nz: usize, data: Vec<T>) -> Result<Self, CubeError> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(CubeError::EmptyDimension(nx, ny, nz));
        }
        let expected = nx * ny * nz;
        if data.len() != expected {
            return Err(CubeError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let array = ndarray::Array3::from_shape_vec((nx, ny, nz), data)
            .map_err(|_| CubeError::SizeMismatch {
                expected,
                actual: 0,
            })?;
        Ok(Self::wrap(CowArray::from(array)))
    }
}

impl<'a, T: CubeElement> Cube<'a, T> {
    /// Non-owning view over externally supplied memory.
    ///
    /// The first voxel write copies the data into owned storage.
    pub fn from_slice(
        nx: usize,
        ny: usize,
        nz: usize,
        data: &'a [T],
    ) -> Result<Self, CubeError> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(CubeError::EmptyDimension(nx, ny, nz));
        }
        let expected = nx * ny * nz;
        if data.len() != expected {
            return Err(CubeError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let view = ArrayView3::from_shape((nx, ny, nz), data)
            .map_err(|_| CubeError::SizeMismatch {
                expected,
                actual: data.len(),
            })?;
        Ok(Self::wrap(CowArray::from(view)))
    }

    fn wrap(data: CowArray<'a, T, Ix3>) -> Self {
        let mut cube = Self {
            data,
            header: MetaData::new(),
            data_min: None,
            data_max: None,
        };
        cube.rescan_extrema();
        cube
    }

    pub fn size_x(&self) -> usize {
        self.data.dim().0
    }

    pub fn size_y(&self) -> usize {
        self.data.dim().1
    }

    pub fn size_z(&self) -> usize {
        self.data.dim().2
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn element_kind(&self) -> ElementKind {
        T::KIND
    }

    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.size_x() && y < self.size_y() && z < self.size_z()
    }

    /// Whether another cube has identical dimensions
    pub fn same_shape<U: CubeElement>(&self, other: &Cube<'_, U>) -> bool {
        self.size_x() == other.size_x()
            && self.size_y() == other.size_y()
            && self.size_z() == other.size_z()
    }

    /// Voxel read; out-of-range positions yield the element sentinel
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        match self.data.get((x, y, z)) {
            Some(value) => *value,
            None => T::not_found(),
        }
    }

    /// Voxel write; out-of-range positions leave the cube unchanged
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) -> Result<(), CubeError> {
        match self.data.get_mut((x, y, z)) {
            Some(slot) => {
                *slot = value;
                self.track(value);
                Ok(())
            }
            None => Err(CubeError::OutOfRange(x, y, z)),
        }
    }

    /// Accumulate `value` onto a voxel
    pub fn add(&mut self, x: usize, y: usize, z: usize, value: T) -> Result<(), CubeError> {
        let current = match self.data.get((x, y, z)) {
            Some(slot) => *slot,
            None => return Err(CubeError::OutOfRange(x, y, z)),
        };
        self.set(x, y, z, current + value)
    }

    /// Overwrite every voxel with `value`
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
        self.rescan_extrema();
    }

    /// Running minimum over all finite voxel values written so far
    pub fn min(&self) -> Option<T> {
        self.data_min
    }

    /// Running maximum over all finite voxel values written so far
    pub fn max(&self) -> Option<T> {
        self.data_max
    }

    pub fn header(&self) -> &MetaData {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MetaData {
        &mut self.header
    }

    /// Numeric header lookup shortcut
    pub fn header_f64(&self, key: &str) -> Result<f64, crate::metadata::MetaDataError> {
        self.header.get_f64(key)
    }

    /// Iterate all voxels as `((x, y, z), value)`
    pub fn indexed_iter(&self) -> impl Iterator<Item = ((usize, usize, usize), T)> + '_ {
        self.data.indexed_iter().map(|(idx, value)| (idx, *value))
    }

    // Widens the min/max envelope; NaN values are ignored.
    fn track(&mut self, value: T) {
        if value.partial_cmp(&value).is_none() {
            return;
        }
        match self.data_min {
            Some(current) if value >= current => {}
            _ => self.data_min = Some(value),
        }
        match self.data_max {
            Some(current) if value <= current => {}
            _ => self.data_max = Some(value),
        }
    }

    fn rescan_extrema(&mut self) {
        let mut min = None;
        let mut max = None;
        for &value in self.data.iter() {
            if value.partial_cmp(&value).is_none() {
                continue;
            }
            match min {
                Some(current) if value >= current => {}
                _ => min = Some(value),
            }
            match max {
                Some(current) if value <= current => {}
                _ => max = Some(value),
            }
        }
        self.data_min = min;
        self.data_max = max;
    }
}
