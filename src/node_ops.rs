//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Operators and named operations that record steps into a `Graph`.
//!
//! Nothing here computes values. Each function appends one or more steps to
//! the graph of its first operand and returns the node of the last one.
//! Composite operations are built only from other functions of this module.

use std::rc::Rc;

use crate::ErrPack;
use crate::device::Device;
use crate::error::GraphError;
use crate::function::Function;
use crate::graph::{Graph, Node, NodeResult};
use crate::parameter::Parameter;
use crate::shape::Shape;
use crate::util::LossyInto;
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

fn unary<'g>(function: Function, x: Node<'g>) -> NodeResult<'g> {
	x.graph().add_function(function, &[x])
}

fn binary<'g>(function: Function, a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	a.graph().add_function(function, &[a, b])
}

//--------------------------------------------------------------------------------------------------
// Sources

/// Binds `data` as a constant source. `data.len()` must equal `shape.size()`.
pub fn input<'g>(shape: Shape, data: &[f32], device: &Rc<dyn Device>, graph: &'g Graph) -> NodeResult<'g> {
	graph.add_function(Function::input(shape, data, device.clone())?, &[])
}

/// Reads the live value of `param` whenever the graph is evaluated.
pub fn parameter_input<'g>(param: &Rc<Parameter>, graph: &'g Graph) -> NodeResult<'g> {
	graph.add_function(Function::ParameterInput(param.clone()), &[])
}

pub fn copy<'g>(x: Node<'g>, device: &Rc<dyn Device>) -> NodeResult<'g> {
	unary(Function::Copy(device.clone()), x)
}

//--------------------------------------------------------------------------------------------------
// Arithmetic

pub fn positive(x: Node) -> NodeResult {
	unary(Function::Positive, x)
}

pub fn negative(x: Node) -> NodeResult {
	unary(Function::Negative, x)
}

pub fn add_const(x: Node, k: f32) -> NodeResult {
	unary(Function::AddConst(k), x)
}

/// `k - x`
pub fn subtract_const_l(k: f32, x: Node) -> NodeResult {
	unary(Function::SubtractConstL(k), x)
}

/// `x - k`
pub fn subtract_const_r(x: Node, k: f32) -> NodeResult {
	unary(Function::SubtractConstR(k), x)
}

pub fn multiply_const(x: Node, k: f32) -> NodeResult {
	unary(Function::MultiplyConst(k), x)
}

/// `k / x`
pub fn divide_const_l(k: f32, x: Node) -> NodeResult {
	unary(Function::DivideConstL(k), x)
}

/// `x / k`
pub fn divide_const_r(x: Node, k: f32) -> NodeResult {
	unary(Function::DivideConstR(k), x)
}

pub fn add<'g>(a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	binary(Function::Add, a, b)
}

pub fn subtract<'g>(a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	binary(Function::Subtract, a, b)
}

pub fn multiply<'g>(a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	binary(Function::Multiply, a, b)
}

pub fn divide<'g>(a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	binary(Function::Divide, a, b)
}

//--------------------------------------------------------------------------------------------------
// Operators. They return `NodeResult`, so chains are written `((a + b)? * 2.0)?`.

impl<'g> std::ops::Neg for Node<'g> {
	type Output = NodeResult<'g>;

	fn neg(self) -> NodeResult<'g> {
		negative(self)
	}
}

macro_rules! impl_binary_op {
	($trait:ident, $method:ident, $node_node:ident, $node_const:ident, $const_node:ident) => {
		impl<'g> std::ops::$trait for Node<'g> {
			type Output = NodeResult<'g>;

			fn $method(self, rhs: Node<'g>) -> NodeResult<'g> {
				$node_node(self, rhs)
			}
		}

		impl<'g> std::ops::$trait<f32> for Node<'g> {
			type Output = NodeResult<'g>;

			fn $method(self, k: f32) -> NodeResult<'g> {
				$node_const(self, k)
			}
		}

		impl<'g> std::ops::$trait<Node<'g>> for f32 {
			type Output = NodeResult<'g>;

			fn $method(self, x: Node<'g>) -> NodeResult<'g> {
				$const_node(self, x)
			}
		}
	};
}

fn const_add(k: f32, x: Node) -> NodeResult {
	add_const(x, k)
}

fn const_multiply(k: f32, x: Node) -> NodeResult {
	multiply_const(x, k)
}

impl_binary_op!(Add, add, add, add_const, const_add);
impl_binary_op!(Sub, sub, subtract, subtract_const_r, subtract_const_l);
impl_binary_op!(Mul, mul, multiply, multiply_const, const_multiply);
impl_binary_op!(Div, div, divide, divide_const_r, divide_const_l);

//--------------------------------------------------------------------------------------------------
// Math

pub fn sqrt(x: Node) -> NodeResult {
	unary(Function::Sqrt, x)
}

pub fn exp(x: Node) -> NodeResult {
	unary(Function::Exp, x)
}

pub fn tanh(x: Node) -> NodeResult {
	unary(Function::Tanh, x)
}

pub fn sigmoid(x: Node) -> NodeResult {
	unary(Function::Sigmoid, x)
}

pub fn relu(x: Node) -> NodeResult {
	unary(Function::ReLU, x)
}

//--------------------------------------------------------------------------------------------------
// Indexing and linear algebra

/// Selects `ids[b]` along `dim` for every batch element `b`. A single id is
/// applied to the whole batch.
pub fn pick<'g>(x: Node<'g>, dim: usize, ids: &[usize]) -> NodeResult<'g> {
	unary(Function::Pick { dim, ids: ids.iter().copied().collect() }, x)
}

/// Keeps `lower..upper` along `dim`.
pub fn slice(x: Node, dim: usize, lower: usize, upper: usize) -> NodeResult {
	unary(Function::Slice { dim, lower, upper }, x)
}

pub fn transpose(x: Node) -> NodeResult {
	unary(Function::Transpose, x)
}

/// Matrix product.
pub fn dot<'g>(a: Node<'g>, b: Node<'_>) -> NodeResult<'g> {
	binary(Function::Dot, a, b)
}

//--------------------------------------------------------------------------------------------------
// Reductions

pub fn sum(x: Node, dim: usize) -> NodeResult {
	unary(Function::Sum { dim }, x)
}

pub fn mean(x: Node, dim: usize) -> NodeResult {
	let s = sum(x, dim)?;
	let n: f32 = x.shape()[dim].lossy_into();
	(1.0 / n) * s
}

pub fn logsumexp(x: Node, dim: usize) -> NodeResult {
	unary(Function::LogSumExp { dim }, x)
}

/// Repeats `x` `size` times along `dim`. `x` must have size 1 in `dim`.
pub fn broadcast(x: Node, dim: usize, size: usize) -> NodeResult {
	unary(Function::Broadcast { dim, size }, x)
}

pub fn log_softmax(x: Node, dim: usize) -> NodeResult {
	let lse = logsumexp(x, dim)?;
	x - broadcast(lse, dim, x.shape()[dim])?
}

pub fn softmax(x: Node, dim: usize) -> NodeResult {
	exp(log_softmax(x, dim)?)
}

/// Cross entropy of `softmax(x)` against the distribution `t` along `dim`.
pub fn softmax_cross_entropy<'g>(x: Node<'g>, t: Node<'_>, dim: usize) -> NodeResult<'g> {
	binary(Function::SoftmaxCrossEntropy { dim }, x, t)
}

/// Cross entropy with the target class given as an index per batch element.
pub fn softmax_cross_entropy_sparse<'g>(x: Node<'g>, dim: usize, ids: &[usize]) -> NodeResult<'g> {
	pick((-log_softmax(x, dim)?)?, dim, ids)
}

//--------------------------------------------------------------------------------------------------

/// Inverted dropout. Zeroes each element with probability `rate` and scales
/// the rest by `1 / (1 - rate)`. Returns `x` itself when `enabled` is false.
#[allow(clippy::float_cmp)]
pub fn dropout(x: Node, rate: f32, enabled: bool) -> NodeResult {
	if !(0.0..=1.0).contains(&rate) {
		cold_path();
		return Err(ErrPack::with_message(
			GraphError::InvalidArgument,
			format!("dropout: rate = {rate} not in [0, 1]"),
		));
	}
	if !enabled {
		return Ok(x);
	}
	if rate == 1.0 {
		return 0.0 * x;
	}
	let p = 1.0 - rate;
	let scaled = ((1.0 / p) * x)?;
	let mask = random::bernoulli(x.shape(), p, &x.device(), x.graph())?;
	scaled * mask
}

//--------------------------------------------------------------------------------------------------

/// Operations across the batch dimension.
pub mod batch {
	use super::*;

	pub fn sum(x: Node) -> NodeResult {
		unary(Function::BatchSum, x)
	}

	pub fn mean(x: Node) -> NodeResult {
		let s = sum(x)?;
		let n: f32 = x.shape().batch().lossy_into();
		(1.0 / n) * s
	}

	/// Scales the batch to zero mean and unit (unbiased) variance.
	/// An unbatched `x` is returned unchanged.
	pub fn normalize(x: Node) -> NodeResult {
		let batch = x.shape().batch();
		if batch <= 1 {
			return Ok(x);
		}
		let b: f32 = batch.lossy_into();
		let m = mean(x)?;
		let m2 = mean((x * x)?)?;
		let v = ((b / (b - 1.0)) * (m2 - (m * m)?)?)?;
		(x - m)? / sqrt((v + 1e-8)?)?
	}
}

//--------------------------------------------------------------------------------------------------

/// Random sources. A new sample is drawn every time the graph is evaluated.
pub mod random {
	use super::*;

	pub fn bernoulli<'g>(shape: Shape, p: f32, device: &Rc<dyn Device>, graph: &'g Graph) -> NodeResult<'g> {
		graph.add_function(Function::random_bernoulli(shape, p, device.clone())?, &[])
	}

	/// Uniform on `(lower, upper]`.
	pub fn uniform<'g>(
		shape: Shape,
		lower: f32,
		upper: f32,
		device: &Rc<dyn Device>,
		graph: &'g Graph,
	) -> NodeResult<'g> {
		graph.add_function(Function::random_uniform(shape, lower, upper, device.clone())?, &[])
	}

	pub fn normal<'g>(
		shape: Shape,
		mean: f32,
		sd: f32,
		device: &Rc<dyn Device>,
		graph: &'g Graph,
	) -> NodeResult<'g> {
		graph.add_function(Function::random_normal(shape, mean, sd, device.clone())?, &[])
	}

	/// `exp` of a normal sample with the given `mean` and `sd`.
	pub fn log_normal<'g>(
		shape: Shape,
		mean: f32,
		sd: f32,
		device: &Rc<dyn Device>,
		graph: &'g Graph,
	) -> NodeResult<'g> {
		graph.add_function(Function::random_log_normal(shape, mean, sd, device.clone())?, &[])
	}
}

//--------------------------------------------------------------------------------------------------
