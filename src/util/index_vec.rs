//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::hash::Hash;

//--------------------------------------------------------------------------------------------------

pub trait IndexTrait: Copy + Clone + PartialEq + Eq + Hash + Ord {
	fn to_raw(self) -> usize;
	fn from_raw(raw: usize) -> Self;
}

#[macro_export]
macro_rules! define_index_type {
	($name:ident) => {
		#[repr(transparent)]
		#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
		pub struct $name {
			pub raw: usize,
		}

		impl $name {
			pub fn new(raw: usize) -> Self {
				$name { raw }
			}
		}

		impl $crate::util::index_vec::IndexTrait for $name {
			fn to_raw(self) -> usize {
				self.raw
			}

			fn from_raw(raw: usize) -> Self {
				$name { raw }
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
				write!(f, "{}", self.raw)
			}
		}
	};
}

//--------------------------------------------------------------------------------------------------

/// A `Vec` addressed by a typed index. Items can only be appended,
/// so every index handed out by `push` stays valid for the life of the vector.
pub struct IndexVec<Index: IndexTrait, T> {
	raw: Vec<T>,
	_marker: std::marker::PhantomData<Index>,
}

impl<Index: IndexTrait, T> Default for IndexVec<Index, T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<Index: IndexTrait, T> IndexVec<Index, T> {
	pub fn new() -> Self {
		Self {
			raw: Vec::new(),
			_marker: std::marker::PhantomData,
		}
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			raw: Vec::with_capacity(capacity),
			_marker: std::marker::PhantomData,
		}
	}

	pub fn push(&mut self, item: T) -> Index {
		let index = Index::from_raw(self.raw.len());
		self.raw.push(item);
		index
	}

	pub fn next_index(&self) -> Index {
		Index::from_raw(self.raw.len())
	}

	pub fn indexes(&self) -> impl DoubleEndedIterator<Item = Index> + use<Index, T> {
		let len = self.raw.len();
		(0..len).map(Index::from_raw)
	}

	pub fn get(&self, index: Index) -> Option<&T> {
		self.raw.get(index.to_raw())
	}

	pub fn len(&self) -> usize {
		self.raw.len()
	}

	pub fn is_empty(&self) -> bool {
		self.raw.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, T> {
		self.raw.iter()
	}
}

#[allow(clippy::indexing_slicing)]
impl<Index: IndexTrait, T> std::ops::Index<Index> for IndexVec<Index, T> {
	type Output = T;

	fn index(&self, index: Index) -> &T {
		&self.raw[index.to_raw()]
	}
}

#[allow(clippy::indexing_slicing)]
impl<Index: IndexTrait, T> std::ops::IndexMut<Index> for IndexVec<Index, T> {
	fn index_mut(&mut self, index: Index) -> &mut T {
		&mut self.raw[index.to_raw()]
	}
}

impl<'a, Index: IndexTrait, T> IntoIterator for &'a IndexVec<Index, T> {
	type Item = &'a T;
	type IntoIter = std::slice::Iter<'a, T>;
	fn into_iter(self) -> Self::IntoIter {
		self.raw.iter()
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
