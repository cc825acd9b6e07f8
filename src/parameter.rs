//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::ErrPack;
use crate::device::{Device, Tensor};
use crate::error::DeviceError;
use crate::shape::Shape;
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Named trainable value living on a device.
///
/// Graphs read the value at evaluation time, so updates made through
/// `set_value` are visible to every later evaluation.
pub struct Parameter {
	name: String,
	shape: Shape,
	value: RefCell<Tensor>,
}

impl Parameter {
	pub fn new<S: Into<String>>(
		name: S,
		shape: Shape,
		data: &[f32],
		device: Rc<dyn Device>,
	) -> Result<Rc<Self>, ErrPack<DeviceError>> {
		if shape.has_batch() {
			cold_path();
			return Err(ErrPack::with_message(
				DeviceError::ShapeMismatch,
				format!("parameter shape {shape} cannot be batched"),
			));
		}
		let value = device.new_tensor(&shape, data)?;
		Ok(Rc::new(Self { name: name.into(), shape, value: RefCell::new(value) }))
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn device(&self) -> Rc<dyn Device> {
		self.value.borrow().device().clone()
	}

	pub fn value(&self) -> Tensor {
		self.value.borrow().clone()
	}

	pub fn set_value(&self, data: &[f32]) -> Result<(), ErrPack<DeviceError>> {
		let value = self.device().new_tensor(&self.shape, data)?;
		*self.value.borrow_mut() = value;
		log::trace!("parameter {}: value updated", self.name);
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::cpu::CPUDevice;

	#[test]
	fn value_is_shared_until_replaced() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let shape = Shape::from_dims(&[2]).unwrap();
		let param = Parameter::new("w", shape, &[1.0, 2.0], dev).unwrap();

		let a = param.value();
		let b = param.value();
		assert!(a.shares_data(&b));

		param.set_value(&[3.0, 4.0]).unwrap();
		assert_eq!(param.value().to_vector(), vec![3.0, 4.0]);
		assert_eq!(a.to_vector(), vec![1.0, 2.0]);

		assert_eq!(param.set_value(&[1.0]).unwrap_err().code, DeviceError::InvalidBufferSize);
		assert_eq!(param.name(), "w");
	}
}

//--------------------------------------------------------------------------------------------------
