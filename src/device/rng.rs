//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::util::cold_path;

// State initialization constant ("expand 32-byte k")
const CONST: [u32; 4] = [0x_6170_7865, 0x_3320_646e, 0x_7962_2d32, 0x_6b20_6574];

const STATE_WORDS: usize = 16;

pub struct Rng {
	state: [u32; STATE_WORDS],
	block: [u32; STATE_WORDS],
	pos: usize,
}

impl Default for Rng {
	fn default() -> Self {
		#[rustfmt::skip]
		let key = [
			0x_0a69_ee79, 0x_fb23_8e49, 0x_9bf9_a072, 0x_00da_bd56,
			0x_0420_fb57, 0x_7d06_2de2, 0x_2b40_4131, 0x_4ed7_e569,
		];
		Self::new(&key)
	}
}

#[allow(clippy::indexing_slicing)]
impl Rng {
	pub fn new(key: &[u32; 8]) -> Self {
		// just some arbitrary constants
		let iv = [0x_1ada_b14a, 0x_4c3d_51fd];
		#[rustfmt::skip]
		let state = [
			CONST[0], CONST[1], CONST[2], CONST[3],
			key[0],   key[1],   key[2],   key[3],
			key[4],   key[5],   key[6],   key[7],
			0,        0,        iv[0],    iv[1],
		];
		Self {
			state,
			block: [0; STATE_WORDS],
			pos: STATE_WORDS,
		}
	}

	/// Mixes `seed` into the first two key words of the default key.
	#[allow(clippy::cast_possible_truncation)]
	pub fn from_seed(seed: u64) -> Self {
		let mut rng = Self::default();
		rng.state[4] ^= seed as u32;
		rng.state[5] ^= (seed >> 32) as u32;
		rng
	}

	// generates a block of random numbers
	fn get_block(&mut self) -> [u32; STATE_WORDS] {
		let mut result = self.state;

		// do 4 double rounds, i.e. 8 rounds
		for _ in 0..4 {
			Self::quarter_round(0, 4, 8, 12, &mut result);
			Self::quarter_round(1, 5, 9, 13, &mut result);
			Self::quarter_round(2, 6, 10, 14, &mut result);
			Self::quarter_round(3, 7, 11, 15, &mut result);

			Self::quarter_round(0, 5, 10, 15, &mut result);
			Self::quarter_round(1, 6, 11, 12, &mut result);
			Self::quarter_round(2, 7, 8, 13, &mut result);
			Self::quarter_round(3, 4, 9, 14, &mut result);
		}

		// add original state
		#[allow(clippy::needless_range_loop)]
		for i in 0..STATE_WORDS {
			result[i] = result[i].wrapping_add(self.state[i]);
		}

		// increment counter
		let (t, c) = self.state[12].overflowing_add(1);
		self.state[12] = t;
		self.state[13] = self.state[13].wrapping_add(u32::from(c));

		result
	}

	// internal function used by get_block()
	#[inline(always)]
	fn quarter_round(a: usize, b: usize, c: usize, d: usize, state: &mut [u32; STATE_WORDS]) {
		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(16);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(12);

		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(8);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(7);
	}

	pub fn next_u32(&mut self) -> u32 {
		if self.pos >= STATE_WORDS {
			self.block = self.get_block();
			self.pos = 0;
		}
		let v = self.block[self.pos];
		self.pos += 1;
		v
	}

	/// Uniform in [0.0, 1.0)
	pub fn get_uniform(&mut self) -> f64 {
		let v: f64 = self.next_u32().into();
		v * (1.0 / 4_294_967_296.0)
	}

	/// Standard normal, clamped to (-10.0, 10.0).
	pub fn get_normal(&mut self) -> f64 {
		let x = 1.0 - self.get_uniform(); // (0.0, 1.0]
		let y = self.get_uniform(); // [0.0, 1.0)

		// box mueller transform
		let r = (-2.0 * x.ln()).sqrt();
		let theta = std::f64::consts::TAU * y;
		let result = r * theta.cos();

		if result.abs() > 10.0 {
			cold_path();
			log::warn!("Rng::get_normal(): clamping {result} to (-10.0, 10.0)");
			return 0.0;
		}
		result
	}

	pub fn fill_bernoulli(&mut self, p: f32, out: &mut [f32]) {
		let p = f64::from(p);
		for v in out.iter_mut() {
			*v = if self.get_uniform() < p { 1.0 } else { 0.0 };
		}
	}

	#[allow(clippy::cast_possible_truncation)]
	pub fn fill_uniform(&mut self, lower: f32, upper: f32, out: &mut [f32]) {
		let lower = f64::from(lower);
		let range = f64::from(upper) - lower;
		for v in out.iter_mut() {
			// (lower, upper]
			*v = range.mul_add(1.0 - self.get_uniform(), lower) as f32;
		}
	}

	#[allow(clippy::cast_possible_truncation)]
	pub fn fill_normal(&mut self, mean: f32, sd: f32, out: &mut [f32]) {
		let (mean, sd) = (f64::from(mean), f64::from(sd));
		for v in out.iter_mut() {
			*v = sd.mul_add(self.get_normal(), mean) as f32;
		}
	}

	#[allow(clippy::cast_possible_truncation)]
	pub fn fill_log_normal(&mut self, mean: f32, sd: f32, out: &mut [f32]) {
		let (mean, sd) = (f64::from(mean), f64::from(sd));
		for v in out.iter_mut() {
			*v = sd.mul_add(self.get_normal(), mean).exp() as f32;
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_seed_same_stream() {
		let mut a = Rng::from_seed(42);
		let mut b = Rng::from_seed(42);
		let mut c = Rng::from_seed(43);
		let xa: Vec<u32> = (0..40).map(|_| a.next_u32()).collect();
		let xb: Vec<u32> = (0..40).map(|_| b.next_u32()).collect();
		let xc: Vec<u32> = (0..40).map(|_| c.next_u32()).collect();
		assert_eq!(xa, xb);
		assert_ne!(xa, xc);
	}

	#[test]
	fn default_key_stream() {
		let mut a = Rng::default();
		let mut b = Rng::new(&[
			0x_0a69_ee79, 0x_fb23_8e49, 0x_9bf9_a072, 0x_00da_bd56,
			0x_0420_fb57, 0x_7d06_2de2, 0x_2b40_4131, 0x_4ed7_e569,
		]);
		let mut c = Rng::new(&[0; 8]);
		let xa: Vec<u32> = (0..20).map(|_| a.next_u32()).collect();
		let xb: Vec<u32> = (0..20).map(|_| b.next_u32()).collect();
		let xc: Vec<u32> = (0..20).map(|_| c.next_u32()).collect();
		assert_eq!(xa, xb);
		assert_ne!(xa, xc);
	}

	#[test]
	fn distributions_stay_in_range() {
		let mut rng = Rng::default();
		let mut out = vec![0.0; 1000];

		rng.fill_bernoulli(0.3, &mut out);
		assert!(out.iter().all(|&v| v == 0.0 || v == 1.0));
		let ones = out.iter().filter(|&&v| v == 1.0).count();
		assert!((200..400).contains(&ones));

		rng.fill_uniform(-2.0, 3.0, &mut out);
		assert!(out.iter().all(|&v| (-2.0..=3.0).contains(&v)));

		rng.fill_log_normal(0.0, 1.0, &mut out);
		assert!(out.iter().all(|&v| v > 0.0));

		rng.fill_normal(5.0, 0.5, &mut out);
		let mean = out.iter().sum::<f32>() / 1000.0;
		assert!((mean - 5.0).abs() < 0.1);
	}
}

//--------------------------------------------------------------------------------------------------
