//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

use x17graph::node_ops::{self, batch, dot, relu, softmax, softmax_cross_entropy_sparse};
use x17graph::{CPUDevice, Device, Graph, Parameter, Shape};

fn init_logging() -> Result<(), log::SetLoggerError> {
	let verbosity = std::env::var("X17GRAPH_LOG")
		.ok()
		.and_then(|v| v.trim().parse::<usize>().ok())
		.unwrap_or(1);
	stderrlog::new().module("x17graph").verbosity(verbosity).init()
}

#[allow(clippy::cast_precision_loss)]
fn weights(rows: usize, cols: usize) -> Vec<f32> {
	(0..rows * cols).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.1).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	init_logging()?;

	let dev: Rc<dyn Device> = CPUDevice::with_seed("CPU", 1);
	let w1 = Parameter::new("w1", Shape::from_dims(&[5, 4])?, &weights(5, 4), dev.clone())?;
	let b1 = Parameter::new("b1", Shape::from_dims(&[5])?, &[0.1; 5], dev.clone())?;
	let w2 = Parameter::new("w2", Shape::from_dims(&[3, 5])?, &weights(3, 5), dev.clone())?;

	let g = Graph::new();
	#[rustfmt::skip]
	let x = node_ops::input(
		Shape::new(&[4], 3)?,
		&[
			1.0, 0.5, -1.0, 2.0,
			0.0, 1.0, 1.0, -0.5,
			-2.0, 0.3, 0.7, 1.0,
		],
		&dev,
		&g,
	)?;

	let h = (dot(node_ops::parameter_input(&w1, &g)?, x)? + node_ops::parameter_input(&b1, &g)?)?;
	let h = node_ops::dropout(relu(h)?, 0.2, true)?;
	let logits = dot(node_ops::parameter_input(&w2, &g)?, h)?;
	let loss = batch::mean(softmax_cross_entropy_sparse(logits, 0, &[0, 2, 1])?)?;
	let probs = softmax(logits, 0)?;

	print!("{}", g.dump_graphviz());
	println!("// steps: {}", g.num_steps());
	println!("// probabilities: {:?}", probs.to_vector()?);
	println!("// loss: {}", loss.to_float()?);
	Ok(())
}
