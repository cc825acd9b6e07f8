//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

use crate::ErrPack;
use crate::error::DeviceError;
use crate::function::Function;
use crate::shape::Shape;
use crate::util::cold_path;

pub mod cpu;
pub mod rng;

//--------------------------------------------------------------------------------------------------

/// Executes primitive kernels on the data it holds.
///
/// The graph never looks inside a device. It only passes the handle from
/// source functions to the steps that use them and asks the device to run
/// the kernel of each step during evaluation.
pub trait Device {
	fn name(&self) -> &str;

	fn new_tensor(self: Rc<Self>, shape: &Shape, data: &[f32]) -> Result<Tensor, ErrPack<DeviceError>>;

	/// Runs the forward kernel of `function`.
	///
	/// `out_shape` is the shape the graph resolved for the step. `inputs` are
	/// ordered as the step's inputs.
	fn forward(
		self: Rc<Self>,
		function: &Function,
		inputs: &[&Tensor],
		out_shape: &Shape,
	) -> Result<Tensor, ErrPack<DeviceError>>;
}

impl std::fmt::Debug for dyn Device {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Device({})", self.name())
	}
}

pub fn same_device(a: &Rc<dyn Device>, b: &Rc<dyn Device>) -> bool {
	Rc::ptr_eq(a, b)
}

//--------------------------------------------------------------------------------------------------

/// Values of one evaluated step. Cloning shares the data.
///
/// Data is laid out with the first dimension changing fastest and the batch
/// outermost.
#[derive(Clone)]
pub struct Tensor {
	shape: Shape,
	device: Rc<dyn Device>,
	data: Rc<[f32]>,
}

impl Tensor {
	pub fn new(
		shape: Shape,
		device: Rc<dyn Device>,
		data: Rc<[f32]>,
	) -> Result<Self, ErrPack<DeviceError>> {
		if data.len() != shape.size() {
			cold_path();
			return Err(ErrPack::with_message(
				DeviceError::InvalidBufferSize,
				format!("buffer of {} values for shape {shape}", data.len()),
			));
		}
		Ok(Self { shape, device, data })
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn device(&self) -> &Rc<dyn Device> {
		&self.device
	}

	pub fn data(&self) -> &[f32] {
		&self.data
	}

	pub fn to_vector(&self) -> Vec<f32> {
		self.data.to_vec()
	}

	/// The single value of a tensor with one element.
	pub fn to_float(&self) -> Option<f32> {
		match *self.data {
			[v] => Some(v),
			_ => None,
		}
	}

	/// Whether both tensors view the same storage.
	pub fn shares_data(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.data, &other.data)
	}
}

impl std::fmt::Debug for Tensor {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Tensor({} on {}: {:?})", self.shape, self.device.name(), &*self.data)
	}
}

//--------------------------------------------------------------------------------------------------
