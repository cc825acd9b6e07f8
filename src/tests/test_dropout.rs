//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use super::{constant, cpu};
use crate::ErrPack;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::node_ops::dropout;

//--------------------------------------------------------------------------------------------------

const X: [f32; 8] = [1.0, -2.0, 3.0, -4.0, 5.0, -6.0, 7.0, -8.0];

#[test]
fn disabled_dropout_is_the_input() -> Result<(), ErrPack<GraphError>> {
	let dev = cpu();
	let g = Graph::new();
	let x = constant(&g, &dev, &[4], 2, &X);
	let steps = g.num_steps();
	let y = dropout(x, 0.5, false)?;
	assert_eq!(y, x);
	assert_eq!(g.num_steps(), steps);
	Ok(())
}

#[test]
fn zero_rate_keeps_every_value() -> Result<(), ErrPack<GraphError>> {
	let dev = cpu();
	let g = Graph::new();
	let x = constant(&g, &dev, &[4], 2, &X);
	let y = dropout(x, 0.0, true)?;
	assert_eq!(y.shape(), x.shape());
	assert_eq!(y.to_vector()?, X.to_vec());
	Ok(())
}

#[test]
fn full_rate_is_zero() -> Result<(), ErrPack<GraphError>> {
	let dev = cpu();
	let g = Graph::new();
	let x = constant(&g, &dev, &[4], 2, &X);
	let steps = g.num_steps();
	let y = dropout(x, 1.0, true)?;
	assert_eq!(g.num_steps(), steps + 1);
	assert_eq!(y.function_name(), "MultiplyConst(0)");
	assert_eq!(y.shape(), x.shape());
	assert!(y.to_vector()?.iter().all(|&v| v == 0.0));
	Ok(())
}

#[test]
fn kept_values_are_rescaled() -> Result<(), ErrPack<GraphError>> {
	let dev = cpu();
	let g = Graph::new();
	let x = constant(&g, &dev, &[4], 2, &X);
	let y = dropout(x, 0.75, true)?;
	for (v, x) in y.to_vector()?.iter().zip(X) {
		assert!(*v == 0.0 || *v == 4.0 * x, "{v} is neither 0 nor 4 * {x}");
	}
	Ok(())
}

#[test]
fn rate_outside_unit_interval_is_rejected() {
	let dev = cpu();
	let g = Graph::new();
	let x = constant(&g, &dev, &[4], 2, &X);
	for rate in [-0.1, 1.5, f32::NAN] {
		assert_eq!(dropout(x, rate, true).unwrap_err().code, GraphError::InvalidArgument);
		assert_eq!(dropout(x, rate, false).unwrap_err().code, GraphError::InvalidArgument);
	}
	assert_eq!(g.num_steps(), 1);
}

//--------------------------------------------------------------------------------------------------
