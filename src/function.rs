//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;
use std::rc::Rc;

use thin_vec::ThinVec;

use crate::ErrPack;
use crate::device::Device;
use crate::error::{GraphError, ShapeError};
use crate::parameter::Parameter;
use crate::shape::{Shape, ops};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Highest arity of any function.
pub const MAX_ARITY: usize = 2;

/// One primitive operation of the graph.
///
/// A function knows its operands' count, the shape of its result and which
/// device runs it. The kernel itself is run by the device.
pub enum Function {
	// sources
	Input(InputData),
	ParameterInput(Rc<Parameter>),
	RandomBernoulli(RandomSource<Bernoulli>),
	RandomUniform(RandomSource<Uniform>),
	RandomNormal(RandomSource<Normal>),
	RandomLogNormal(RandomSource<Normal>),

	Copy(Rc<dyn Device>),

	// elementwise, one operand
	Positive,
	Negative,
	AddConst(f32),
	SubtractConstL(f32), // k - x
	SubtractConstR(f32), // x - k
	MultiplyConst(f32),
	DivideConstL(f32), // k / x
	DivideConstR(f32), // x / k
	Sqrt,
	Exp,
	Tanh,
	Sigmoid,
	ReLU,

	// elementwise, two operands
	Add,
	Subtract,
	Multiply,
	Divide,

	Pick { dim: usize, ids: ThinVec<usize> },
	Slice { dim: usize, lower: usize, upper: usize },
	Transpose,
	Dot,
	Sum { dim: usize },
	LogSumExp { dim: usize },
	Broadcast { dim: usize, size: usize },
	SoftmaxCrossEntropy { dim: usize },
	BatchSum,
}

pub struct InputData {
	pub shape: Shape,
	pub data: Rc<[f32]>,
	pub device: Rc<dyn Device>,
}

pub struct RandomSource<D> {
	pub shape: Shape,
	pub distribution: D,
	pub device: Rc<dyn Device>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bernoulli {
	pub p: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Uniform {
	pub lower: f32,
	pub upper: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normal {
	pub mean: f32,
	pub sd: f32,
}

//--------------------------------------------------------------------------------------------------

#[cold]
#[inline(never)]
fn invalid_argument(message: String) -> ErrPack<GraphError> {
	ErrPack::with_message(GraphError::InvalidArgument, message)
}

impl Function {
	pub fn input(shape: Shape, data: &[f32], device: Rc<dyn Device>) -> Result<Self, ErrPack<GraphError>> {
		if data.len() != shape.size() {
			cold_path();
			return Err(invalid_argument(format!(
				"input: {} values for shape {shape} (expected {})",
				data.len(),
				shape.size()
			)));
		}
		Ok(Self::Input(InputData { shape, data: Rc::from(data), device }))
	}

	pub fn random_bernoulli(
		shape: Shape,
		p: f32,
		device: Rc<dyn Device>,
	) -> Result<Self, ErrPack<GraphError>> {
		if !(0.0..=1.0).contains(&p) {
			cold_path();
			return Err(invalid_argument(format!("bernoulli: p = {p} not in [0, 1]")));
		}
		let distribution = Bernoulli { p };
		Ok(Self::RandomBernoulli(RandomSource { shape, distribution, device }))
	}

	pub fn random_uniform(
		shape: Shape,
		lower: f32,
		upper: f32,
		device: Rc<dyn Device>,
	) -> Result<Self, ErrPack<GraphError>> {
		if !lower.is_finite() || !upper.is_finite() || lower >= upper {
			cold_path();
			return Err(invalid_argument(format!("uniform: invalid range ({lower}, {upper}]")));
		}
		let distribution = Uniform { lower, upper };
		Ok(Self::RandomUniform(RandomSource { shape, distribution, device }))
	}

	pub fn random_normal(
		shape: Shape,
		mean: f32,
		sd: f32,
		device: Rc<dyn Device>,
	) -> Result<Self, ErrPack<GraphError>> {
		let distribution = Normal::new(mean, sd, "normal")?;
		Ok(Self::RandomNormal(RandomSource { shape, distribution, device }))
	}

	pub fn random_log_normal(
		shape: Shape,
		mean: f32,
		sd: f32,
		device: Rc<dyn Device>,
	) -> Result<Self, ErrPack<GraphError>> {
		let distribution = Normal::new(mean, sd, "log_normal")?;
		Ok(Self::RandomLogNormal(RandomSource { shape, distribution, device }))
	}

	pub fn name(&self) -> Cow<'static, str> {
		match self {
			Self::Input(_) => "Input".into(),
			Self::ParameterInput(param) => format!("ParameterInput({})", param.name()).into(),
			Self::RandomBernoulli(r) => format!("RandomBernoulli({})", r.distribution.p).into(),
			Self::RandomUniform(r) => {
				let Uniform { lower, upper } = r.distribution;
				format!("RandomUniform({lower},{upper})").into()
			},
			Self::RandomNormal(r) => {
				let Normal { mean, sd } = r.distribution;
				format!("RandomNormal({mean},{sd})").into()
			},
			Self::RandomLogNormal(r) => {
				let Normal { mean, sd } = r.distribution;
				format!("RandomLogNormal({mean},{sd})").into()
			},
			Self::Copy(dev) => format!("Copy({})", dev.name()).into(),
			Self::Positive => "Positive".into(),
			Self::Negative => "Negative".into(),
			Self::AddConst(k) => format!("AddConst({k})").into(),
			Self::SubtractConstL(k) => format!("SubtractConstL({k})").into(),
			Self::SubtractConstR(k) => format!("SubtractConstR({k})").into(),
			Self::MultiplyConst(k) => format!("MultiplyConst({k})").into(),
			Self::DivideConstL(k) => format!("DivideConstL({k})").into(),
			Self::DivideConstR(k) => format!("DivideConstR({k})").into(),
			Self::Sqrt => "Sqrt".into(),
			Self::Exp => "Exp".into(),
			Self::Tanh => "Tanh".into(),
			Self::Sigmoid => "Sigmoid".into(),
			Self::ReLU => "ReLU".into(),
			Self::Add => "Add".into(),
			Self::Subtract => "Subtract".into(),
			Self::Multiply => "Multiply".into(),
			Self::Divide => "Divide".into(),
			Self::Pick { dim, ids } => format!("Pick({dim},{:?})", &ids[..]).into(),
			Self::Slice { dim, lower, upper } => format!("Slice({dim},{lower},{upper})").into(),
			Self::Transpose => "Transpose".into(),
			Self::Dot => "Dot".into(),
			Self::Sum { dim } => format!("Sum({dim})").into(),
			Self::LogSumExp { dim } => format!("LogSumExp({dim})").into(),
			Self::Broadcast { dim, size } => format!("Broadcast({dim},{size})").into(),
			Self::SoftmaxCrossEntropy { dim } => format!("SoftmaxCrossEntropy({dim})").into(),
			Self::BatchSum => "BatchSum".into(),
		}
	}

	pub fn arity(&self) -> usize {
		match self {
			Self::Input(_)
			| Self::ParameterInput(_)
			| Self::RandomBernoulli(_)
			| Self::RandomUniform(_)
			| Self::RandomNormal(_)
			| Self::RandomLogNormal(_) => 0,

			Self::Add
			| Self::Subtract
			| Self::Multiply
			| Self::Divide
			| Self::Dot
			| Self::SoftmaxCrossEntropy { .. } => 2,

			Self::Copy(_)
			| Self::Positive
			| Self::Negative
			| Self::AddConst(_)
			| Self::SubtractConstL(_)
			| Self::SubtractConstR(_)
			| Self::MultiplyConst(_)
			| Self::DivideConstL(_)
			| Self::DivideConstR(_)
			| Self::Sqrt
			| Self::Exp
			| Self::Tanh
			| Self::Sigmoid
			| Self::ReLU
			| Self::Pick { .. }
			| Self::Slice { .. }
			| Self::Transpose
			| Self::Sum { .. }
			| Self::LogSumExp { .. }
			| Self::Broadcast { .. }
			| Self::BatchSum => 1,
		}
	}

	pub fn is_source(&self) -> bool {
		self.arity() == 0
	}

	/// The device the function is bound to. Functions that return `None` run
	/// on the device of their first operand.
	pub fn device(&self) -> Option<Rc<dyn Device>> {
		match self {
			Self::Input(input) => Some(input.device.clone()),
			Self::ParameterInput(param) => Some(param.device()),
			Self::RandomBernoulli(r) => Some(r.device.clone()),
			Self::RandomUniform(r) => Some(r.device.clone()),
			Self::RandomNormal(r) | Self::RandomLogNormal(r) => Some(r.device.clone()),
			Self::Copy(dev) => Some(dev.clone()),
			_ => None,
		}
	}

	/// Output shape for the given operand shapes.
	pub fn forward_shape(&self, inputs: &[&Shape]) -> Result<Shape, ErrPack<ShapeError>> {
		match (self, inputs) {
			(Self::Input(input), []) => Ok(input.shape.clone()),
			(Self::ParameterInput(param), []) => Ok(param.shape().clone()),
			(Self::RandomBernoulli(r), []) => Ok(r.shape.clone()),
			(Self::RandomUniform(r), []) => Ok(r.shape.clone()),
			(Self::RandomNormal(r) | Self::RandomLogNormal(r), []) => Ok(r.shape.clone()),

			(
				Self::Copy(_)
				| Self::Positive
				| Self::Negative
				| Self::AddConst(_)
				| Self::SubtractConstL(_)
				| Self::SubtractConstR(_)
				| Self::MultiplyConst(_)
				| Self::DivideConstL(_)
				| Self::DivideConstR(_)
				| Self::Sqrt
				| Self::Exp
				| Self::Tanh
				| Self::Sigmoid
				| Self::ReLU,
				[x],
			) => Ok((*x).clone()),

			(Self::Add | Self::Subtract | Self::Multiply | Self::Divide, [a, b]) => {
				ops::elementwise(a, b)
			},

			(Self::Pick { dim, ids }, [x]) => ops::pick(x, *dim, ids),
			(Self::Slice { dim, lower, upper }, [x]) => ops::slice(x, *dim, *lower, *upper),
			(Self::Transpose, [x]) => ops::transpose(x),
			(Self::Dot, [a, b]) => ops::matmul(a, b),
			(Self::Sum { dim } | Self::LogSumExp { dim }, [x]) => ops::reduce(x, *dim),
			(Self::Broadcast { dim, size }, [x]) => ops::broadcast(x, *dim, *size),
			(Self::SoftmaxCrossEntropy { dim }, [x, t]) => ops::softmax_cross_entropy(x, t, *dim),
			(Self::BatchSum, [x]) => ops::batch_sum(x),

			_ => {
				cold_path();
				Err(ErrPack::with_message(
					ShapeError::ArityMismatch,
					format!("{}: expected {} operands, got {}", self.name(), self.arity(), inputs.len()),
				))
			},
		}
	}
}

impl Normal {
	fn new(mean: f32, sd: f32, what: &str) -> Result<Self, ErrPack<GraphError>> {
		if !mean.is_finite() || !sd.is_finite() || sd <= 0.0 {
			cold_path();
			return Err(invalid_argument(format!("{what}: invalid mean = {mean}, sd = {sd}")));
		}
		Ok(Self { mean, sd })
	}
}

impl std::fmt::Debug for Function {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.name())
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
