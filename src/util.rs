//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod index_vec;

/// Marks the enclosing branch as unlikely.
#[cold]
#[inline(never)]
pub fn cold_path() {}

pub trait LossyInto<T> {
	fn lossy_into(self) -> T;
}

#[allow(clippy::cast_precision_loss)]
impl LossyInto<f32> for usize {
	fn lossy_into(self) -> f32 {
		self as f32
	}
}
