//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::SmallVec;

use crate::ErrPack;
use crate::error::ShapeError;
use crate::util::cold_path;

pub mod ops;

//--------------------------------------------------------------------------------------------------

/// Maximum number of explicit dimensions. Axes at or above the stored depth
/// have size 1, so any `dim < MAX_DEPTH` is a valid axis index.
pub const MAX_DEPTH: usize = 8;

/// Dimensions of a tensor plus the number of samples in the batch.
///
/// Trailing dimensions of size 1 are never stored, so `[3, 1]` and `[3]`
/// describe the same shape. A batch of 1 means "not batched".
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Shape {
	dims: SmallVec<[usize; MAX_DEPTH]>,
	batch: usize,
	volume: usize,
}

impl Default for Shape {
	fn default() -> Self {
		Self::scalar()
	}
}

impl Shape {
	pub fn new(dims: &[usize], batch: usize) -> Result<Self, ErrPack<ShapeError>> {
		let depth = dims.iter().rposition(|&d| d != 1).map_or(0, |i| i + 1);
		let dims = dims.get(..depth).unwrap_or(dims);
		if depth > MAX_DEPTH {
			cold_path();
			return Err(ErrPack::with_message(
				ShapeError::InvalidShape,
				format!("too many dimensions: {depth} > {MAX_DEPTH}"),
			));
		}
		if batch == 0 || dims.contains(&0) {
			cold_path();
			return Err(ErrPack::with_message(
				ShapeError::InvalidShape,
				format!("zero-sized dimension in {dims:?}x{batch}"),
			));
		}
		let mut volume: usize = 1;
		for &dim in dims {
			let Some(v) = volume.checked_mul(dim) else {
				cold_path();
				return Err(ErrPack::with_message(
					ShapeError::InvalidShape,
					"number of elements overflows",
				));
			};
			volume = v;
		}
		if volume.checked_mul(batch).is_none() {
			cold_path();
			return Err(ErrPack::with_message(
				ShapeError::InvalidShape,
				"number of elements overflows",
			));
		}
		Ok(Self { dims: SmallVec::from_slice(dims), batch, volume })
	}

	pub fn from_dims(dims: &[usize]) -> Result<Self, ErrPack<ShapeError>> {
		Self::new(dims, 1)
	}

	pub fn scalar() -> Self {
		Self { dims: SmallVec::new(), batch: 1, volume: 1 }
	}

	pub fn dims(&self) -> &[usize] {
		&self.dims
	}

	pub fn depth(&self) -> usize {
		self.dims.len()
	}

	pub fn batch(&self) -> usize {
		self.batch
	}

	pub fn has_batch(&self) -> bool {
		self.batch > 1
	}

	/// Number of elements in one sample.
	pub fn volume(&self) -> usize {
		self.volume
	}

	/// Number of elements in the whole batch.
	pub fn size(&self) -> usize {
		self.volume * self.batch
	}

	/// Product of the dimensions below `dim`.
	pub fn lower_volume(&self, dim: usize) -> usize {
		self.dims.iter().take(dim).product()
	}

	pub fn is_scalar(&self) -> bool {
		self.dims.is_empty()
	}

	pub fn is_matrix(&self) -> bool {
		self.dims.len() <= 2
	}

	pub fn has_same_dims(&self, other: &Self) -> bool {
		self.dims == other.dims
	}

	/// Batches are compatible when equal or when either side is not batched.
	pub fn has_compatible_batch(&self, other: &Self) -> bool {
		self.batch == other.batch || self.batch == 1 || other.batch == 1
	}

	pub fn resize_dim(&self, dim: usize, size: usize) -> Result<Self, ErrPack<ShapeError>> {
		if dim >= MAX_DEPTH {
			cold_path();
			return Err(ErrPack::with_message(
				ShapeError::DimIndexOutOfBounds,
				format!("dimension index {dim} out of bounds (max depth {MAX_DEPTH})"),
			));
		}
		let mut dims: SmallVec<[usize; MAX_DEPTH]> = self.dims.clone();
		if dims.len() <= dim {
			dims.resize(dim + 1, 1);
		}
		if let Some(d) = dims.get_mut(dim) {
			*d = size;
		}
		Self::new(&dims, self.batch)
	}

	pub fn resize_batch(&self, batch: usize) -> Result<Self, ErrPack<ShapeError>> {
		if batch == 0 {
			cold_path();
			return Err(ErrPack::with_message(ShapeError::InvalidShape, "zero batch size"));
		}
		Ok(Self {
			dims: self.dims.clone(),
			batch,
			volume: self.volume,
		})
	}
}

impl std::ops::Index<usize> for Shape {
	type Output = usize;

	/// Returns 1 for axes beyond the stored depth.
	fn index(&self, dim: usize) -> &usize {
		self.dims.get(dim).unwrap_or(&1)
	}
}

impl std::fmt::Display for Shape {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "[")?;
		for (i, dim) in self.dims.iter().enumerate() {
			if i > 0 {
				write!(f, ",")?;
			}
			write!(f, "{dim}")?;
		}
		write!(f, "]x{}", self.batch)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn trailing_ones_are_elided() {
		let a = Shape::new(&[3, 1, 1], 1).unwrap();
		let b = Shape::from_dims(&[3]).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.depth(), 1);
		assert_eq!(a[0], 3);
		assert_eq!(a[1], 1);
		assert_eq!(a[7], 1);
		assert!(Shape::from_dims(&[1, 1]).unwrap().is_scalar());
	}

	#[test]
	fn volume_and_size() {
		let s = Shape::new(&[2, 3, 4], 5).unwrap();
		assert_eq!(s.volume(), 24);
		assert_eq!(s.size(), 120);
		assert_eq!(s.lower_volume(2), 6);
		assert!(s.has_batch());
		assert!(!s.is_matrix());
		assert_eq!(s.to_string(), "[2,3,4]x5");
	}

	#[test]
	fn invalid_shapes_are_rejected() {
		assert_eq!(Shape::new(&[2, 0], 1).unwrap_err().code, ShapeError::InvalidShape);
		assert_eq!(Shape::new(&[2], 0).unwrap_err().code, ShapeError::InvalidShape);
		assert_eq!(
			Shape::from_dims(&[2; MAX_DEPTH + 1]).unwrap_err().code,
			ShapeError::InvalidShape
		);
		assert_eq!(
			Shape::from_dims(&[usize::MAX, 2]).unwrap_err().code,
			ShapeError::InvalidShape
		);
	}

	#[test]
	fn resize_produces_new_shapes() {
		let s = Shape::new(&[3], 2).unwrap();
		let r = s.resize_dim(2, 4).unwrap();
		assert_eq!(r.dims(), &[3, 1, 4]);
		assert_eq!(s.dims(), &[3]);
		assert_eq!(r.resize_dim(2, 1).unwrap(), s);
		assert_eq!(s.resize_batch(1).unwrap().batch(), 1);
		assert_eq!(
			s.resize_dim(MAX_DEPTH, 2).unwrap_err().code,
			ShapeError::DimIndexOutOfBounds
		);
	}

	#[test]
	fn batch_compatibility() {
		let a = Shape::new(&[2], 3).unwrap();
		let b = Shape::new(&[2], 1).unwrap();
		let c = Shape::new(&[2], 4).unwrap();
		assert!(a.has_compatible_batch(&b));
		assert!(b.has_compatible_batch(&c));
		assert!(!a.has_compatible_batch(&c));
	}
}

//--------------------------------------------------------------------------------------------------
