//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

mod test_dropout;

use std::rc::Rc;

use crate::device::Device;
use crate::device::cpu::CPUDevice;
use crate::graph::{Graph, Node};
use crate::node_ops;
use crate::shape::Shape;

//--------------------------------------------------------------------------------------------------

pub fn cpu() -> Rc<dyn Device> {
	CPUDevice::with_seed("CPU", 42)
}

#[allow(clippy::unwrap_used)]
pub fn constant<'g>(g: &'g Graph, dev: &Rc<dyn Device>, dims: &[usize], batch: usize, data: &[f32]) -> Node<'g> {
	let shape = Shape::new(dims, batch).unwrap();
	node_ops::input(shape, data, dev, g).unwrap()
}

//--------------------------------------------------------------------------------------------------
