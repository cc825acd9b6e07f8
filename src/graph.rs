//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use arrayvec::ArrayVec;
use bit_set::BitSet;

use crate::device::{Device, Tensor, same_device};
use crate::error::GraphError;
use crate::function::{Function, MAX_ARITY};
use crate::shape::Shape;
use crate::util::cold_path;
use crate::util::index_vec::IndexVec;
use crate::{ErrPack, define_index_type};

//--------------------------------------------------------------------------------------------------

define_index_type!(StepIndex);

pub type StepInputs = ArrayVec<StepIndex, MAX_ARITY>;

/// One recorded operation. Never modified after it is appended.
pub struct Step {
	function: Function,
	inputs: StepInputs,
	shape: Shape,
	device: Rc<dyn Device>,
}

impl Step {
	pub fn function(&self) -> &Function {
		&self.function
	}

	/// Steps this one reads, in operand order. Always lower than its own index.
	pub fn inputs(&self) -> &[StepIndex] {
		&self.inputs
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn device(&self) -> &Rc<dyn Device> {
		&self.device
	}
}

pub type NodeResult<'g> = Result<Node<'g>, ErrPack<GraphError>>;

//--------------------------------------------------------------------------------------------------

/// Append-only table of steps for one expression.
///
/// Steps can only reference steps created before them, so the graph is
/// acyclic without any cycle detection. Building a graph is single threaded;
/// `Graph` is neither `Send` nor `Sync`.
#[derive(Default)]
pub struct Graph {
	steps: RefCell<IndexVec<StepIndex, Step>>,
}

impl Graph {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn num_steps(&self) -> usize {
		self.steps.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.steps.borrow().is_empty()
	}

	fn owns(&self, node: &Node) -> bool {
		std::ptr::eq(self, node.graph)
	}

	#[cold]
	#[inline(never)]
	fn ownership_violation(node: &Node) -> ErrPack<GraphError> {
		ErrPack::with_message(
			GraphError::OwnershipViolation,
			format!("node {} belongs to a different graph", node.step),
		)
	}

	/// Records `function` applied to `inputs` and returns the node of the new step.
	///
	/// Fails if an input belongs to another graph, if the number of inputs
	/// does not match the function's arity, if the function's shape rule
	/// rejects the input shapes, or if the inputs live on different devices.
	/// Nothing is recorded on failure.
	pub fn add_function<'g>(&'g self, function: Function, inputs: &[Node<'_>]) -> NodeResult<'g> {
		let result = self.__add_function(function, inputs);
		if let Err(ref err) = result {
			log::debug!("add_function rejected: {err}");
		}
		result
	}

	#[allow(clippy::indexing_slicing)]
	fn __add_function<'g>(&'g self, function: Function, inputs: &[Node<'_>]) -> NodeResult<'g> {
		if let Some(foreign) = inputs.iter().find(|node| !self.owns(node)) {
			cold_path();
			return Err(Self::ownership_violation(foreign));
		}
		if inputs.len() != function.arity() {
			cold_path();
			return Err(ErrPack::with_message(
				GraphError::ArityMismatch,
				format!(
					"{} takes {} inputs, got {}",
					function.name(),
					function.arity(),
					inputs.len()
				),
			));
		}

		let mut steps = self.steps.borrow_mut();

		let input_steps: StepInputs = inputs.iter().map(|node| node.step).collect();
		let shape = {
			let input_shapes: ArrayVec<&Shape, MAX_ARITY> =
				input_steps.iter().map(|&i| &steps[i].shape).collect();
			function.forward_shape(&input_shapes)?
		};

		let device = match (function.device(), input_steps.first()) {
			(Some(device), _) => device,
			(None, Some(&first)) => steps[first].device.clone(),
			(None, None) => {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::InvalidArgument,
					format!("{}: no device", function.name()),
				));
			},
		};
		if !matches!(function, Function::Copy(_)) {
			if let Some(&other) = input_steps.iter().find(|&&i| !same_device(&steps[i].device, &device)) {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::DeviceMismatch,
					format!(
						"{}: input {other} is on {}, expected {}",
						function.name(),
						steps[other].device.name(),
						device.name()
					),
				));
			}
		}

		let index = steps.push(Step { function, inputs: input_steps, shape, device });
		log::trace!("step {index}: {} -> {}", steps[index].function.name(), steps[index].shape);
		Ok(Node { graph: self, step: index })
	}

	/// Checked access to a step of this graph.
	#[allow(clippy::indexing_slicing)]
	fn with_step<'n, R>(&self, node: &Node<'n>, f: impl FnOnce(&Step) -> R) -> Result<R, ErrPack<GraphError>> {
		if !self.owns(node) {
			cold_path();
			return Err(Self::ownership_violation(node));
		}
		let steps = self.steps.borrow();
		Ok(f(&steps[node.step]))
	}

	pub fn shape_of(&self, node: &Node) -> Result<Shape, ErrPack<GraphError>> {
		self.with_step(node, |step| step.shape.clone())
	}

	pub fn device_of(&self, node: &Node) -> Result<Rc<dyn Device>, ErrPack<GraphError>> {
		self.with_step(node, |step| step.device.clone())
	}

	pub fn function_name(&self, node: &Node) -> Result<Cow<'static, str>, ErrPack<GraphError>> {
		self.with_step(node, |step| step.function.name())
	}

	pub fn input_steps(&self, node: &Node) -> Result<StepInputs, ErrPack<GraphError>> {
		self.with_step(node, |step| step.inputs.clone())
	}

	/// Visits every step in creation order.
	///
	/// The step table stays borrowed while `f` runs. `f` may query the graph
	/// but must not add steps to it; `add_function` from inside `f` panics.
	#[allow(clippy::indexing_slicing)]
	pub fn for_each_step(&self, mut f: impl FnMut(StepIndex, &Step)) {
		let steps = self.steps.borrow();
		for index in steps.indexes() {
			f(index, &steps[index]);
		}
	}

	/// Evaluates `node` and every step it depends on.
	///
	/// Nothing is cached between calls; random sources draw new values every time.
	#[allow(clippy::indexing_slicing)]
	pub fn forward(&self, node: &Node) -> Result<Tensor, ErrPack<GraphError>> {
		if !self.owns(node) {
			cold_path();
			return Err(Self::ownership_violation(node));
		}
		let steps = self.steps.borrow();
		let target = node.step.raw;

		let mut needed = BitSet::with_capacity(target + 1);
		needed.insert(target);
		for i in (0..=target).rev() {
			if needed.contains(i) {
				for input in &steps[StepIndex::new(i)].inputs {
					needed.insert(input.raw);
				}
			}
		}

		let mut values: Vec<Option<Tensor>> = vec![None; target + 1];
		for i in &needed {
			let step = &steps[StepIndex::new(i)];
			let value = {
				let mut inputs = ArrayVec::<&Tensor, MAX_ARITY>::new();
				for input in &step.inputs {
					let Some(Some(value)) = values.get(input.raw) else {
						cold_path();
						return Err(ErrPack::with_message(
							GraphError::EvaluationFailed,
							format!("step {i}: input {input} was not evaluated"),
						));
					};
					inputs.push(value);
				}
				step.device.clone().forward(&step.function, &inputs, &step.shape)?
			};
			if value.shape() != &step.shape {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::EvaluationFailed,
					format!(
						"step {i}: {} produced {}, expected {}",
						step.function.name(),
						value.shape(),
						step.shape
					),
				));
			}
			log::trace!("evaluated step {i}: {}", step.function.name());
			if let Some(slot) = values.get_mut(i) {
				*slot = Some(value);
			}
		}

		values.get_mut(target).and_then(Option::take).ok_or_else(|| {
			ErrPack::with_message(GraphError::EvaluationFailed, "target was not evaluated")
		})
	}

	/// Renders the step table in graphviz dot format.
	pub fn dump_graphviz(&self) -> String {
		let mut s = String::new();
		let _ = self.__dump_graphviz(&mut s);
		s
	}

	#[allow(clippy::indexing_slicing)]
	fn __dump_graphviz<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
		writeln!(w, "digraph G {{")?;
		writeln!(w, "\trankdir=LR;")?;

		let steps = self.steps.borrow();
		for i in steps.indexes() {
			let step = &steps[i];
			writeln!(
				w,
				"\tnode_{} [label=\"{}\\n{}\\n{}\"];",
				i.raw,
				step.function.name(),
				step.shape,
				step.device.name()
			)?;
			for input in &step.inputs {
				writeln!(w, "\tnode_{} -> node_{};", input.raw, i.raw)?;
			}
		}

		writeln!(w, "}}")?;
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

/// Handle of one step of a graph.
///
/// Holds no data, only the graph and the step index. Copies refer to the
/// same step. Two nodes are equal when they belong to the same graph and
/// refer to the same step.
#[derive(Clone, Copy)]
pub struct Node<'g> {
	graph: &'g Graph,
	step: StepIndex,
}

impl<'g> Node<'g> {
	pub fn graph(&self) -> &'g Graph {
		self.graph
	}

	pub fn step(&self) -> StepIndex {
		self.step
	}

	#[allow(clippy::indexing_slicing)]
	pub fn shape(&self) -> Shape {
		self.graph.steps.borrow()[self.step].shape.clone()
	}

	#[allow(clippy::indexing_slicing)]
	pub fn device(&self) -> Rc<dyn Device> {
		self.graph.steps.borrow()[self.step].device.clone()
	}

	#[allow(clippy::indexing_slicing)]
	pub fn function_name(&self) -> Cow<'static, str> {
		self.graph.steps.borrow()[self.step].function.name()
	}

	pub fn forward(&self) -> Result<Tensor, ErrPack<GraphError>> {
		self.graph.forward(self)
	}

	pub fn to_vector(&self) -> Result<Vec<f32>, ErrPack<GraphError>> {
		Ok(self.forward()?.to_vector())
	}

	pub fn to_float(&self) -> Result<f32, ErrPack<GraphError>> {
		let value = self.forward()?;
		value.to_float().ok_or_else(|| {
			ErrPack::with_message(
				GraphError::InvalidArgument,
				format!("to_float: node {} has shape {}", self.step, value.shape()),
			)
		})
	}
}

impl PartialEq for Node<'_> {
	fn eq(&self, other: &Self) -> bool {
		std::ptr::eq(self.graph, other.graph) && self.step == other.step
	}
}

impl Eq for Node<'_> {}

impl std::fmt::Debug for Node<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Node(step {} of graph {:p})", self.step, self.graph)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::cpu::CPUDevice;

	fn input<'g>(g: &'g Graph, dev: &Rc<dyn Device>, dims: &[usize], batch: usize) -> Node<'g> {
		let shape = Shape::new(dims, batch).unwrap();
		let data = vec![1.0; shape.size()];
		g.add_function(Function::input(shape, &data, dev.clone()).unwrap(), &[]).unwrap()
	}

	#[test]
	fn steps_get_dense_increasing_ids() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		assert!(g.is_empty());
		let a = input(&g, &dev, &[2, 3], 1);
		let b = input(&g, &dev, &[2, 3], 1);
		let c = g.add_function(Function::Add, &[a, b]).unwrap();
		assert_eq!((a.step().raw, b.step().raw, c.step().raw), (0, 1, 2));
		assert_eq!(g.num_steps(), 3);
		assert_eq!(g.input_steps(&c).unwrap().as_slice(), &[a.step(), b.step()]);
		assert_eq!(c.shape(), Shape::from_dims(&[2, 3]).unwrap());
		assert_eq!(c.function_name(), "Add");
	}

	#[test]
	fn identical_calls_are_not_merged() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		let a = input(&g, &dev, &[2], 1);
		let x = g.add_function(Function::Exp, &[a]).unwrap();
		let y = g.add_function(Function::Exp, &[a]).unwrap();
		assert_ne!(x, y);
		let x2 = x;
		assert_eq!(x, x2);
	}

	#[test]
	fn failed_add_commits_nothing() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		let a = input(&g, &dev, &[2, 3], 1);
		let b = input(&g, &dev, &[3, 2], 1);
		let err = g.add_function(Function::Add, &[a, b]).unwrap_err();
		assert_eq!(err.code, GraphError::ShapeMismatch);
		assert_eq!(g.num_steps(), 2);

		let err = g.add_function(Function::Add, &[a]).unwrap_err();
		assert_eq!(err.code, GraphError::ArityMismatch);
		let err = g.add_function(Function::Sum { dim: 100 }, &[a]).unwrap_err();
		assert_eq!(err.code, GraphError::ShapeMismatch);
		assert_eq!(g.num_steps(), 2);
	}

	#[test]
	fn foreign_nodes_are_rejected() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g1 = Graph::new();
		let g2 = Graph::new();
		let a = input(&g1, &dev, &[2], 1);
		let _b = input(&g2, &dev, &[2], 1);
		let err = g2.add_function(Function::Exp, &[a]).unwrap_err();
		assert_eq!(err.code, GraphError::OwnershipViolation);
		assert_eq!(g2.num_steps(), 1);
		assert_eq!(g2.shape_of(&a).unwrap_err().code, GraphError::OwnershipViolation);
		assert_eq!(g2.device_of(&a).unwrap_err().code, GraphError::OwnershipViolation);
		assert_eq!(g2.forward(&a).unwrap_err().code, GraphError::OwnershipViolation);
	}

	#[test]
	fn devices_must_match_except_for_copy() {
		let cpu0: Rc<dyn Device> = CPUDevice::new("CPU0");
		let cpu1: Rc<dyn Device> = CPUDevice::new("CPU1");
		let g = Graph::new();
		let a = input(&g, &cpu0, &[2], 1);
		let b = input(&g, &cpu1, &[2], 1);
		let err = g.add_function(Function::Add, &[a, b]).unwrap_err();
		assert_eq!(err.code, GraphError::DeviceMismatch);

		assert!(same_device(&g.device_of(&a).unwrap(), &cpu0));
		let moved = g.add_function(Function::Copy(cpu1.clone()), &[a]).unwrap();
		assert!(same_device(&moved.device(), &cpu1));
		assert!(same_device(&g.device_of(&moved).unwrap(), &cpu1));
		let sum = g.add_function(Function::Add, &[moved, b]).unwrap();
		assert_eq!(sum.device().name(), "CPU1");
		assert_eq!(sum.to_vector().unwrap(), vec![2.0, 2.0]);
	}

	#[test]
	fn forward_evaluates_only_reachable_steps() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		let a = input(&g, &dev, &[2], 1);
		let _unused = g.add_function(Function::Sqrt, &[a]).unwrap();
		let b = g.add_function(Function::MultiplyConst(3.0), &[a]).unwrap();
		assert_eq!(b.to_vector().unwrap(), vec![3.0, 3.0]);
		let s = g.add_function(Function::Sum { dim: 0 }, &[b]).unwrap();
		assert_eq!(s.to_float().unwrap(), 6.0);
		assert_eq!(b.to_float().unwrap_err().code, GraphError::InvalidArgument);
	}

	#[test]
	fn graphviz_lists_steps_and_edges() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		let a = input(&g, &dev, &[2], 1);
		let _ = g.add_function(Function::Negative, &[a]).unwrap();
		let dot = g.dump_graphviz();
		assert!(dot.starts_with("digraph G {"));
		assert!(dot.contains("node_0 [label=\"Input\\n[2]x1\\nCPU\"];"));
		assert!(dot.contains("node_0 -> node_1;"));

		let mut names = Vec::new();
		g.for_each_step(|i, step| names.push((i.raw, step.function().name())));
		assert_eq!(names, vec![(0, "Input".into()), (1, "Negative".into())]);
	}

	#[test]
	fn step_visitor_can_query_the_graph() {
		let dev: Rc<dyn Device> = CPUDevice::new("CPU");
		let g = Graph::new();
		let a = input(&g, &dev, &[2, 3], 1);
		let s = g.add_function(Function::Sum { dim: 1 }, &[a]).unwrap();

		let mut seen = Vec::new();
		g.for_each_step(|i, step| {
			assert_eq!(g.num_steps(), 2);
			assert_eq!(step.inputs().len(), i.raw);
			seen.push(step.shape().clone());
		});
		assert_eq!(seen, vec![g.shape_of(&a).unwrap(), g.shape_of(&s).unwrap()]);
		assert_eq!(seen[1], Shape::from_dims(&[2]).unwrap());
	}
}

//--------------------------------------------------------------------------------------------------
