//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;

//--------------------------------------------------------------------------------------------------

/// Rejection reported by a shape rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShapeError {
	InvalidShape,
	DimsMismatch,
	BatchMismatch,
	DimIndexOutOfBounds,
	IndexOutOfBounds,
	InvalidRange,
	NotAMatrix,
	InnerDimMismatch,
	NotReduced,
	EmptyIds,
	ArityMismatch,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
	ShapeMismatch,
	OwnershipViolation,
	ArityMismatch,
	InvalidArgument,
	DeviceMismatch,
	EvaluationFailed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceError {
	InvalidBufferSize,
	ShapeMismatch,
	Unsupported,
}

//--------------------------------------------------------------------------------------------------

impl From<ShapeError> for GraphError {
	#[cold]
	#[inline(never)]
	fn from(err: ShapeError) -> Self {
		match err {
			ShapeError::InvalidShape | ShapeError::InvalidRange | ShapeError::EmptyIds => {
				Self::InvalidArgument
			},
			ShapeError::DimsMismatch
			| ShapeError::BatchMismatch
			| ShapeError::DimIndexOutOfBounds
			| ShapeError::IndexOutOfBounds
			| ShapeError::NotAMatrix
			| ShapeError::InnerDimMismatch
			| ShapeError::NotReduced => Self::ShapeMismatch,
			ShapeError::ArityMismatch => Self::ArityMismatch,
		}
	}
}

impl From<ErrPack<ShapeError>> for ErrPack<GraphError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<ShapeError>) -> Self {
		Self { code: err.code.into(), extra: err.extra }
	}
}

impl From<ShapeError> for ErrPack<GraphError> {
	#[cold]
	#[inline(never)]
	fn from(err: ShapeError) -> Self {
		Self { code: err.into(), extra: None }
	}
}

impl From<ErrPack<DeviceError>> for ErrPack<GraphError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<DeviceError>) -> Self {
		let message = format!("device error: {:?}", err.code);
		Self::with_nested(GraphError::EvaluationFailed, message, err)
	}
}

impl From<ErrPack<ShapeError>> for ErrPack<DeviceError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<ShapeError>) -> Self {
		Self { code: DeviceError::ShapeMismatch, extra: err.extra }
	}
}

impl ErrPack<GraphError> {
	#[cold]
	#[inline(never)]
	fn with_nested<E: std::error::Error + Send + Sync + 'static>(
		code: GraphError,
		message: String,
		nested: E,
	) -> Self {
		Self {
			code,
			extra: Some(Box::new(crate::ErrExtra {
				message: message.into(),
				nested: Some(Box::new(nested)),
			})),
		}
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
