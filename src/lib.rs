//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

#![allow(non_snake_case)]
// clippy
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::indexing_slicing)]
#![warn(clippy::panic_in_result_fn)]
#![warn(clippy::panic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::elidable_lifetime_names)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::comparison_chain)]
#![allow(non_camel_case_types)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::let_and_return)]
#![allow(clippy::needless_lifetimes)]
#![allow(unused_parens)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::if_not_else)]
#![allow(clippy::module_name_repetitions)]

use std::borrow::Cow;
use std::convert::Infallible;

pub mod device;
pub mod error;
pub mod function;
pub mod graph;
pub mod node_ops;
pub mod parameter;
pub mod shape;
pub mod util;

#[cfg(test)]
mod tests;

pub use device::cpu::CPUDevice;
pub use device::{Device, Tensor};
pub use error::{DeviceError, GraphError, ShapeError};
pub use function::Function;
pub use graph::{Graph, Node};
pub use parameter::Parameter;
pub use shape::Shape;

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct ErrExtra {
	pub message: Cow<'static, str>,
	pub nested: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ErrPack<Code: Copy + std::fmt::Debug> {
	pub code: Code,
	pub extra: Option<Box<ErrExtra>>,
}

impl<Code: Copy + std::fmt::Debug> ErrPack<Code> {
	#[cold]
	#[inline(never)]
	pub fn new(code: Code) -> Self {
		Self { code, extra: None }
	}

	#[cold]
	#[inline(never)]
	pub fn with_message<M: Into<Cow<'static, str>>>(code: Code, message: M) -> Self {
		Self {
			code,
			extra: Some(Box::new(ErrExtra { message: message.into(), nested: None })),
		}
	}

	pub fn message(&self) -> &str {
		self.extra.as_ref().map_or("", |extra| extra.message.as_ref())
	}
}

#[cold]
#[inline(never)]
#[allow(clippy::panic)]
fn panic_infallible_to_err_conversion<Code: Copy + std::fmt::Debug>() -> ErrPack<Code> {
	panic!("Infallible should never be converted to ErrPack");
}

impl<Code: Copy + std::fmt::Debug> From<Infallible> for ErrPack<Code> {
	fn from(_: Infallible) -> Self {
		panic_infallible_to_err_conversion()
	}
}

impl<Code: Copy + std::fmt::Debug> std::error::Error for ErrPack<Code> {
}

impl<Code: Copy + std::fmt::Debug> std::fmt::Display for ErrPack<Code> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let code = self.code;
		write!(f, "(ErrPack: code={code:?}")?;
		if let Some(ref extra) = self.extra {
			let msg = extra.message.as_ref();
			if !msg.is_empty() {
				write!(f, ", message={msg}")?;
			}
			if let Some(nested) = &extra.nested {
				write!(f, ", nested={nested:?}")?;
			}
		}
		write!(f, ")")
	}
}

//--------------------------------------------------------------------------------------------------
