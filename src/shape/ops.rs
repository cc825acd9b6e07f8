//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Shape rules shared by the primitive functions.
//!
//! Every rule is pure: it looks at operand shapes and operation parameters
//! and either returns the output shape or rejects the combination.

use crate::ErrPack;
use crate::error::ShapeError;
use crate::util::cold_path;

use super::{MAX_DEPTH, Shape};

//--------------------------------------------------------------------------------------------------

pub fn check_dim(dim: usize) -> Result<(), ErrPack<ShapeError>> {
	if dim >= MAX_DEPTH {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::DimIndexOutOfBounds,
			format!("dimension index {dim} out of bounds (max depth {MAX_DEPTH})"),
		));
	}
	Ok(())
}

fn common_batch(a: &Shape, b: &Shape, op: &str) -> Result<usize, ErrPack<ShapeError>> {
	if !a.has_compatible_batch(b) {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::BatchMismatch,
			format!("{op}: batch size mismatch: {a} vs {b}"),
		));
	}
	Ok(a.batch().max(b.batch()))
}

/// Dims must match exactly, batch broadcasts 1 <-> N.
pub fn elementwise(a: &Shape, b: &Shape) -> Result<Shape, ErrPack<ShapeError>> {
	if !a.has_same_dims(b) {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::DimsMismatch,
			format!("elementwise: dimension mismatch: {a} vs {b}"),
		));
	}
	let batch = common_batch(a, b, "elementwise")?;
	a.resize_batch(batch)
}

pub fn slice(x: &Shape, dim: usize, lower: usize, upper: usize) -> Result<Shape, ErrPack<ShapeError>> {
	check_dim(dim)?;
	if lower >= upper || upper > x[dim] {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::InvalidRange,
			format!("slice: invalid range {lower}..{upper} for dimension {dim} of {x}"),
		));
	}
	x.resize_dim(dim, upper - lower)
}

/// One id per sample: `ids.len()` must be 1, or equal to the batch of `x`,
/// or `x` must be unbatched. The picked dimension collapses to 1.
pub fn pick(x: &Shape, dim: usize, ids: &[usize]) -> Result<Shape, ErrPack<ShapeError>> {
	check_dim(dim)?;
	let n = ids.len();
	if n == 0 {
		cold_path();
		return Err(ErrPack::with_message(ShapeError::EmptyIds, "pick: no ids"));
	}
	if n != 1 && x.batch() != 1 && n != x.batch() {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::BatchMismatch,
			format!("pick: {n} ids for {x}"),
		));
	}
	let size = x[dim];
	if let Some(&id) = ids.iter().find(|&&id| id >= size) {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::IndexOutOfBounds,
			format!("pick: index {id} out of range for dimension {dim} of {x}"),
		));
	}
	x.resize_dim(dim, 1)?.resize_batch(n.max(x.batch()))
}

pub fn transpose(x: &Shape) -> Result<Shape, ErrPack<ShapeError>> {
	if !x.is_matrix() {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::NotAMatrix,
			format!("transpose: {x} is not a matrix"),
		));
	}
	Shape::new(&[x[1], x[0]], x.batch())
}

pub fn matmul(a: &Shape, b: &Shape) -> Result<Shape, ErrPack<ShapeError>> {
	if !a.is_matrix() || !b.is_matrix() {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::NotAMatrix,
			format!("dot: operands must be matrices: {a} vs {b}"),
		));
	}
	if a[1] != b[0] {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::InnerDimMismatch,
			format!("dot: inner dimension mismatch: {a} vs {b}"),
		));
	}
	let batch = common_batch(a, b, "dot")?;
	Shape::new(&[a[0], b[1]], batch)
}

/// Reduction along `dim`; the reduced dimension becomes 1.
pub fn reduce(x: &Shape, dim: usize) -> Result<Shape, ErrPack<ShapeError>> {
	check_dim(dim)?;
	x.resize_dim(dim, 1)
}

pub fn broadcast(x: &Shape, dim: usize, size: usize) -> Result<Shape, ErrPack<ShapeError>> {
	check_dim(dim)?;
	if x[dim] != 1 {
		cold_path();
		return Err(ErrPack::with_message(
			ShapeError::NotReduced,
			format!("broadcast: dimension {dim} of {x} is not 1"),
		));
	}
	if size == 0 {
		cold_path();
		return Err(ErrPack::with_message(ShapeError::InvalidShape, "broadcast: zero size"));
	}
	x.resize_dim(dim, size)
}

pub fn batch_sum(x: &Shape) -> Result<Shape, ErrPack<ShapeError>> {
	x.resize_batch(1)
}

pub fn softmax_cross_entropy(
	x: &Shape,
	t: &Shape,
	dim: usize,
) -> Result<Shape, ErrPack<ShapeError>> {
	let joined = elementwise(x, t)?;
	reduce(&joined, dim)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	fn shape(dims: &[usize], batch: usize) -> Shape {
		Shape::new(dims, batch).unwrap()
	}

	#[test]
	fn elementwise_broadcasts_batch_only() {
		let r = elementwise(&shape(&[2, 3], 1), &shape(&[2, 3], 4)).unwrap();
		assert_eq!(r, shape(&[2, 3], 4));
		let err = elementwise(&shape(&[2, 3], 1), &shape(&[3, 2], 1)).unwrap_err();
		assert_eq!(err.code, ShapeError::DimsMismatch);
		let err = elementwise(&shape(&[2], 2), &shape(&[2], 3)).unwrap_err();
		assert_eq!(err.code, ShapeError::BatchMismatch);
	}

	#[test]
	fn slice_bounds() {
		assert_eq!(slice(&shape(&[4, 5], 1), 1, 1, 3).unwrap(), shape(&[4, 2], 1));
		assert_eq!(slice(&shape(&[4], 1), 0, 2, 2).unwrap_err().code, ShapeError::InvalidRange);
		assert_eq!(slice(&shape(&[4], 1), 0, 1, 5).unwrap_err().code, ShapeError::InvalidRange);
		assert_eq!(
			slice(&shape(&[4], 1), MAX_DEPTH, 0, 1).unwrap_err().code,
			ShapeError::DimIndexOutOfBounds
		);
	}

	#[test]
	fn pick_ids_follow_batch() {
		assert_eq!(pick(&shape(&[10], 3), 0, &[1, 2, 3]).unwrap(), shape(&[], 3));
		assert_eq!(pick(&shape(&[10, 2], 1), 0, &[1, 2]).unwrap(), shape(&[1, 2], 2));
		assert_eq!(pick(&shape(&[10], 3), 0, &[9]).unwrap(), shape(&[], 3));
		assert_eq!(pick(&shape(&[10], 3), 0, &[1, 2]).unwrap_err().code, ShapeError::BatchMismatch);
		assert_eq!(pick(&shape(&[10], 1), 0, &[10]).unwrap_err().code, ShapeError::IndexOutOfBounds);
		assert_eq!(pick(&shape(&[10], 1), 0, &[]).unwrap_err().code, ShapeError::EmptyIds);
	}

	#[test]
	fn matrix_rules() {
		assert_eq!(transpose(&shape(&[2, 3], 5)).unwrap(), shape(&[3, 2], 5));
		assert_eq!(transpose(&shape(&[4], 1)).unwrap(), shape(&[1, 4], 1));
		assert_eq!(transpose(&shape(&[2, 3, 4], 1)).unwrap_err().code, ShapeError::NotAMatrix);
		assert_eq!(matmul(&shape(&[2, 3], 1), &shape(&[3, 4], 2)).unwrap(), shape(&[2, 4], 2));
		assert_eq!(
			matmul(&shape(&[2, 3], 1), &shape(&[2, 3], 1)).unwrap_err().code,
			ShapeError::InnerDimMismatch
		);
	}

	#[test]
	fn reduce_and_broadcast() {
		let x = shape(&[3, 4], 2);
		let r = reduce(&x, 1).unwrap();
		assert_eq!(r, shape(&[3], 2));
		assert_eq!(broadcast(&r, 1, 4).unwrap(), x);
		assert_eq!(reduce(&x, 5).unwrap(), x);
		assert_eq!(broadcast(&x, 0, 2).unwrap_err().code, ShapeError::NotReduced);
		assert_eq!(batch_sum(&x).unwrap(), shape(&[3, 4], 1));
		assert_eq!(
			softmax_cross_entropy(&x, &shape(&[3, 4], 1), 0).unwrap(),
			shape(&[1, 4], 2)
		);
	}
}

//--------------------------------------------------------------------------------------------------
