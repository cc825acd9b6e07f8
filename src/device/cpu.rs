//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::{ArrayD, ArrayView2, ArrayViewD, Axis, Ix2, IxDyn, ShapeBuilder, Slice, Zip};
use smallvec::SmallVec;

use crate::ErrPack;
use crate::device::rng::Rng;
use crate::device::{Device, Tensor};
use crate::error::DeviceError;
use crate::function::Function;
use crate::shape::{MAX_DEPTH, Shape};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

// Kernels view every tensor with all MAX_DEPTH axes plus the batch axis,
// in column-major order, so an axis index is the dimension index itself.
const BATCH_AXIS: Axis = Axis(MAX_DEPTH);

type FullDims = SmallVec<[usize; MAX_DEPTH + 1]>;

fn full_dims(shape: &Shape) -> FullDims {
	let mut dims: FullDims = (0..MAX_DEPTH).map(|i| shape[i]).collect();
	dims.push(shape.batch());
	dims
}

#[cold]
#[inline(never)]
fn layout_error(what: &str) -> ErrPack<DeviceError> {
	ErrPack::with_message(DeviceError::ShapeMismatch, format!("cpu: {what}"))
}

fn view(x: &Tensor) -> Result<ArrayViewD<'_, f32>, ErrPack<DeviceError>> {
	let dims = full_dims(x.shape());
	ArrayViewD::from_shape(IxDyn(&dims).f(), x.data()).map_err(|_| layout_error("buffer layout"))
}

fn broadcast_to<'a>(
	x: &'a ArrayViewD<'_, f32>,
	dims: &FullDims,
) -> Result<ArrayViewD<'a, f32>, ErrPack<DeviceError>> {
	x.broadcast(IxDyn(dims)).ok_or_else(|| layout_error("cannot broadcast"))
}

fn flat(x: ArrayViewD<f32>) -> Vec<f32> {
	x.reversed_axes().iter().copied().collect()
}

fn matrix<'a>(x: &ArrayViewD<'a, f32>, b: usize) -> Result<ArrayView2<'a, f32>, ErrPack<DeviceError>> {
	let mut m = x.clone().index_axis_move(BATCH_AXIS, b);
	for k in (2..MAX_DEPTH).rev() {
		m = m.index_axis_move(Axis(k), 0);
	}
	m.into_dimensionality::<Ix2>().map_err(|_| layout_error("not a matrix"))
}

fn batch_index(batch: usize, b: usize) -> usize {
	if batch == 1 { 0 } else { b }
}

fn map(x: &Tensor, f: impl Fn(f32) -> f32) -> Vec<f32> {
	x.data().iter().map(|&v| f(v)).collect()
}

fn binary(
	a: &Tensor,
	b: &Tensor,
	out_shape: &Shape,
	f: impl Fn(f32, f32) -> f32,
) -> Result<Vec<f32>, ErrPack<DeviceError>> {
	let dims = full_dims(out_shape);
	let (a, b) = (view(a)?, view(b)?);
	let a_full = broadcast_to(&a, &dims)?;
	let b_full = broadcast_to(&b, &dims)?;
	let out = Zip::from(a_full).and(b_full).map_collect(|&x, &y| f(x, y));
	Ok(flat(out.view()))
}

/// Log-sum-exp along `dim`, keeping `dim` as an axis of size 1.
///
/// The maximum of each lane is subtracted before exponentiating.
fn logsumexp_lanes(x: &ArrayViewD<f32>, dim: usize) -> ArrayD<f32> {
	x.map_axis(Axis(dim), |lane| {
		let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
		if !max.is_finite() {
			return max;
		}
		max + lane.fold(0.0, |s, &v| s + (v - max).exp()).ln()
	})
	.insert_axis(Axis(dim))
}

fn pick(x: &Tensor, dim: usize, ids: &[usize], out_shape: &Shape) -> Result<Vec<f32>, ErrPack<DeviceError>> {
	let v = view(x)?;
	let mut out = Vec::with_capacity(out_shape.size());
	for b in 0..out_shape.batch() {
		let Some(&id) = ids.get(batch_index(ids.len(), b)) else {
			cold_path();
			return Err(layout_error("pick: missing id"));
		};
		let sample = v.index_axis(BATCH_AXIS, batch_index(x.shape().batch(), b));
		let lane = sample.slice_axis(Axis(dim), Slice::from(id..id + 1));
		out.extend(lane.reversed_axes().iter().copied());
	}
	Ok(out)
}

fn dot(a: &Tensor, b: &Tensor, out_shape: &Shape) -> Result<Vec<f32>, ErrPack<DeviceError>> {
	let (av, bv) = (view(a)?, view(b)?);
	let mut out = Vec::with_capacity(out_shape.size());
	for i in 0..out_shape.batch() {
		let am = matrix(&av, batch_index(a.shape().batch(), i))?;
		let bm = matrix(&bv, batch_index(b.shape().batch(), i))?;
		let c = am.dot(&bm);
		out.extend(c.t().iter().copied());
	}
	Ok(out)
}

fn softmax_cross_entropy(
	x: &Tensor,
	t: &Tensor,
	dim: usize,
	out_shape: &Shape,
) -> Result<Vec<f32>, ErrPack<DeviceError>> {
	let mut dims = full_dims(x.shape());
	if let Some(batch) = dims.last_mut() {
		*batch = out_shape.batch();
	}
	let (xv, tv) = (view(x)?, view(t)?);
	let x_full = broadcast_to(&xv, &dims)?;
	let t_full = broadcast_to(&tv, &dims)?;
	let log_softmax = &x_full - &logsumexp_lanes(&x_full, dim);
	let ce = (&t_full * &log_softmax).sum_axis(Axis(dim)).mapv(|v| -v).insert_axis(Axis(dim));
	Ok(flat(ce.view()))
}

//--------------------------------------------------------------------------------------------------

/// Host device running every kernel with `ndarray`.
pub struct CPUDevice {
	name: String,
	rng: RefCell<Rng>,
}

impl CPUDevice {
	pub fn new<S: Into<String>>(name: S) -> Rc<Self> {
		Rc::new(Self { name: name.into(), rng: RefCell::new(Rng::default()) })
	}

	pub fn with_seed<S: Into<String>>(name: S, seed: u64) -> Rc<Self> {
		Rc::new(Self {
			name: name.into(),
			rng: RefCell::new(Rng::from_seed(seed)),
		})
	}

	fn tensor(self: &Rc<Self>, shape: &Shape, data: Vec<f32>) -> Result<Tensor, ErrPack<DeviceError>> {
		let device: Rc<dyn Device> = self.clone();
		Tensor::new(shape.clone(), device, Rc::from(data))
	}

	fn random(&self, shape: &Shape, fill: impl FnOnce(&mut Rng, &mut [f32])) -> Vec<f32> {
		let mut out = vec![0.0; shape.size()];
		fill(&mut self.rng.borrow_mut(), &mut out);
		out
	}
}

impl Device for CPUDevice {
	fn name(&self) -> &str {
		&self.name
	}

	fn new_tensor(self: Rc<Self>, shape: &Shape, data: &[f32]) -> Result<Tensor, ErrPack<DeviceError>> {
		self.tensor(shape, data.to_vec())
	}

	#[allow(clippy::too_many_lines)]
	fn forward(
		self: Rc<Self>,
		function: &Function,
		inputs: &[&Tensor],
		out_shape: &Shape,
	) -> Result<Tensor, ErrPack<DeviceError>> {
		let data = match (function, inputs) {
			(Function::Input(input), []) => input.data.to_vec(),
			(Function::ParameterInput(param), []) => return Ok(param.value()),
			(Function::RandomBernoulli(r), []) => {
				let p = r.distribution.p;
				self.random(out_shape, |rng, out| rng.fill_bernoulli(p, out))
			},
			(Function::RandomUniform(r), []) => {
				let d = r.distribution;
				self.random(out_shape, |rng, out| rng.fill_uniform(d.lower, d.upper, out))
			},
			(Function::RandomNormal(r), []) => {
				let d = r.distribution;
				self.random(out_shape, |rng, out| rng.fill_normal(d.mean, d.sd, out))
			},
			(Function::RandomLogNormal(r), []) => {
				let d = r.distribution;
				self.random(out_shape, |rng, out| rng.fill_log_normal(d.mean, d.sd, out))
			},

			(Function::Copy(_) | Function::Positive, [x]) => x.to_vector(),
			(Function::Negative, [x]) => map(x, |v| -v),
			(Function::AddConst(k), [x]) => map(x, |v| v + k),
			(Function::SubtractConstL(k), [x]) => map(x, |v| k - v),
			(Function::SubtractConstR(k), [x]) => map(x, |v| v - k),
			(Function::MultiplyConst(k), [x]) => map(x, |v| v * k),
			(Function::DivideConstL(k), [x]) => map(x, |v| k / v),
			(Function::DivideConstR(k), [x]) => map(x, |v| v / k),
			(Function::Sqrt, [x]) => map(x, f32::sqrt),
			(Function::Exp, [x]) => map(x, f32::exp),
			(Function::Tanh, [x]) => map(x, f32::tanh),
			(Function::Sigmoid, [x]) => map(x, |v| (0.5 * v).tanh().mul_add(0.5, 0.5)),
			(Function::ReLU, [x]) => map(x, |v| v.max(0.0)),

			(Function::Add, [a, b]) => binary(a, b, out_shape, |x, y| x + y)?,
			(Function::Subtract, [a, b]) => binary(a, b, out_shape, |x, y| x - y)?,
			(Function::Multiply, [a, b]) => binary(a, b, out_shape, |x, y| x * y)?,
			(Function::Divide, [a, b]) => binary(a, b, out_shape, |x, y| x / y)?,

			(Function::Pick { dim, ids }, [x]) => pick(x, *dim, ids, out_shape)?,
			(Function::Slice { dim, lower, upper }, [x]) => {
				let v = view(x)?;
				flat(v.slice_axis(Axis(*dim), Slice::from(*lower..*upper)))
			},
			(Function::Transpose, [x]) => {
				let mut perm: FullDims = (0..=MAX_DEPTH).collect();
				perm.swap(0, 1);
				flat(view(x)?.permuted_axes(IxDyn(&perm)))
			},
			(Function::Dot, [a, b]) => dot(a, b, out_shape)?,
			(Function::Sum { dim }, [x]) => {
				let sum = view(x)?.sum_axis(Axis(*dim)).insert_axis(Axis(*dim));
				flat(sum.view())
			},
			(Function::LogSumExp { dim }, [x]) => flat(logsumexp_lanes(&view(x)?, *dim).view()),
			(Function::Broadcast { .. }, [x]) => {
				let v = view(x)?;
				flat(broadcast_to(&v, &full_dims(out_shape))?)
			},
			(Function::SoftmaxCrossEntropy { dim }, [x, t]) => {
				softmax_cross_entropy(x, t, *dim, out_shape)?
			},
			(Function::BatchSum, [x]) => {
				let sum = view(x)?.sum_axis(BATCH_AXIS).insert_axis(BATCH_AXIS);
				flat(sum.view())
			},

			_ => {
				cold_path();
				return Err(ErrPack::with_message(
					DeviceError::Unsupported,
					format!("cpu: {} with {} operands", function.name(), inputs.len()),
				));
			},
		};
		self.tensor(out_shape, data)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use assert_approx_eq::assert_approx_eq;

	fn tensor(dev: &Rc<CPUDevice>, dims: &[usize], batch: usize, data: &[f32]) -> Tensor {
		dev.clone().new_tensor(&Shape::new(dims, batch).unwrap(), data).unwrap()
	}

	fn run(dev: &Rc<CPUDevice>, f: &Function, inputs: &[&Tensor]) -> Tensor {
		let shapes: Vec<&Shape> = inputs.iter().map(|t| t.shape()).collect();
		let out_shape = f.forward_shape(&shapes).unwrap();
		dev.clone().forward(f, inputs, &out_shape).unwrap()
	}

	#[test]
	fn sum_follows_column_major_layout() {
		let dev = CPUDevice::new("CPU");
		// [[1, 3, 5], [2, 4, 6]] stored column by column
		let x = tensor(&dev, &[2, 3], 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
		assert_eq!(run(&dev, &Function::Sum { dim: 0 }, &[&x]).to_vector(), vec![3.0, 7.0, 11.0]);
		assert_eq!(run(&dev, &Function::Sum { dim: 1 }, &[&x]).to_vector(), vec![9.0, 12.0]);
		assert_eq!(run(&dev, &Function::Sum { dim: 2 }, &[&x]).to_vector(), x.to_vector());
	}

	#[test]
	fn slice_transpose_broadcast() {
		let dev = CPUDevice::new("CPU");
		let x = tensor(&dev, &[2, 3], 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
		let s = run(&dev, &Function::Slice { dim: 1, lower: 1, upper: 3 }, &[&x]);
		assert_eq!(s.to_vector(), vec![3.0, 4.0, 5.0, 6.0]);
		let t = run(&dev, &Function::Transpose, &[&x]);
		assert_eq!(t.to_vector(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
		let c = tensor(&dev, &[2], 1, &[1.0, 2.0]);
		let b = run(&dev, &Function::Broadcast { dim: 1, size: 3 }, &[&c]);
		assert_eq!(b.to_vector(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
	}

	#[test]
	fn binary_broadcasts_batch() {
		let dev = CPUDevice::new("CPU");
		let a = tensor(&dev, &[2], 2, &[1.0, 2.0, 3.0, 4.0]);
		let b = tensor(&dev, &[2], 1, &[10.0, 20.0]);
		assert_eq!(run(&dev, &Function::Add, &[&a, &b]).to_vector(), vec![11.0, 22.0, 13.0, 24.0]);
		assert_eq!(run(&dev, &Function::Subtract, &[&b, &a]).to_vector(), vec![9.0, 18.0, 7.0, 16.0]);
		let sum = run(&dev, &Function::BatchSum, &[&a]);
		assert_eq!(sum.to_vector(), vec![4.0, 6.0]);
	}

	#[test]
	fn pick_per_sample() {
		let dev = CPUDevice::new("CPU");
		let x = tensor(&dev, &[3], 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
		let f = Function::Pick { dim: 0, ids: thin_vec::thin_vec![2, 0] };
		assert_eq!(run(&dev, &f, &[&x]).to_vector(), vec![3.0, 4.0]);
		let f = Function::Pick { dim: 0, ids: thin_vec::thin_vec![1] };
		assert_eq!(run(&dev, &f, &[&x]).to_vector(), vec![2.0, 5.0]);
	}

	#[test]
	fn dot_of_matrices() {
		let dev = CPUDevice::new("CPU");
		// a = [[1, 2], [3, 4]], b = [[5], [6]]
		let a = tensor(&dev, &[2, 2], 1, &[1.0, 3.0, 2.0, 4.0]);
		let b = tensor(&dev, &[2], 1, &[5.0, 6.0]);
		assert_eq!(run(&dev, &Function::Dot, &[&a, &b]).to_vector(), vec![17.0, 39.0]);
	}

	#[test]
	fn logsumexp_is_stable() {
		let dev = CPUDevice::new("CPU");
		let x = tensor(&dev, &[2], 1, &[1000.0, -1000.0]);
		let y = run(&dev, &Function::LogSumExp { dim: 0 }, &[&x]);
		assert_approx_eq!(y.to_vector()[0], 1000.0, 1e-3);
		let x = tensor(&dev, &[3], 1, &[1.0, 2.0, 3.0]);
		let y = run(&dev, &Function::LogSumExp { dim: 0 }, &[&x]);
		assert_approx_eq!(y.to_vector()[0], 3.407_606, 1e-5);
	}

	#[test]
	fn elementwise_kernels() {
		let dev = CPUDevice::new("CPU");
		let x = tensor(&dev, &[3], 1, &[-1.0, 0.0, 4.0]);
		assert_eq!(run(&dev, &Function::ReLU, &[&x]).to_vector(), vec![0.0, 0.0, 4.0]);
		assert_eq!(run(&dev, &Function::SubtractConstL(1.0), &[&x]).to_vector(), vec![2.0, 1.0, -3.0]);
		assert_eq!(run(&dev, &Function::DivideConstR(2.0), &[&x]).to_vector(), vec![-0.5, 0.0, 2.0]);
		let s = run(&dev, &Function::Sigmoid, &[&x]).to_vector();
		assert_approx_eq!(s[0], 0.268_941_4, 1e-6);
		assert_approx_eq!(s[1], 0.5, 1e-6);
	}
}

//--------------------------------------------------------------------------------------------------
