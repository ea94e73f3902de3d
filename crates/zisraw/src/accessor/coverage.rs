//! Rectangle coverage and the visibility check.
//!
//! The coverage calculator keeps a union of axis-aligned rectangles as a
//! list of pairwise-disjoint pieces. Adding a rectangle inserts only the
//! parts not already covered; a containment query subtracts the coverage
//! from the query rectangle and checks that nothing remains.

use crate::geometry::IntRect;

/// Subtract `b` from `a`, producing up to four disjoint residues.
fn subtract(a: &IntRect, b: &IntRect, out: &mut Vec<IntRect>) {
	let overlap = a.intersect(b);
	if !overlap.is_valid() {
		out.push(*a);
		return;
	}

	// band above the overlap
	if overlap.y > a.y {
		out.push(IntRect::new(a.x, a.y, a.w, overlap.y - a.y));
	}
	// band below
	let a_bottom = a.y + a.h;
	let overlap_bottom = overlap.y + overlap.h;
	if overlap_bottom < a_bottom {
		out.push(IntRect::new(a.x, overlap_bottom, a.w, a_bottom - overlap_bottom));
	}
	// left and right slivers, clipped to the overlap's rows
	if overlap.x > a.x {
		out.push(IntRect::new(a.x, overlap.y, overlap.x - a.x, overlap.h));
	}
	let a_right = a.x + a.w;
	let overlap_right = overlap.x + overlap.w;
	if overlap_right < a_right {
		out.push(IntRect::new(overlap_right, overlap.y, a_right - overlap_right, overlap.h));
	}
}

/// A union of rectangles maintained as pairwise-disjoint pieces.
#[derive(Clone, Debug, Default)]
pub struct RectangleCoverageCalculator {
	pieces: Vec<IntRect>,
}

impl RectangleCoverageCalculator {
	/// An empty coverage set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a rectangle to the coverage.
	pub fn add_rectangle(&mut self, rect: IntRect) {
		if !rect.is_valid() {
			return;
		}

		let mut fresh = vec![rect];
		let mut next = Vec::new();
		for piece in &self.pieces {
			for f in &fresh {
				subtract(f, piece, &mut next);
			}
			fresh.clear();
			std::mem::swap(&mut fresh, &mut next);
			if fresh.is_empty() {
				return;
			}
		}

		self.pieces.extend(fresh);
	}

	/// Add several rectangles.
	pub fn add_rectangles(&mut self, rects: impl IntoIterator<Item = IntRect>) {
		for rect in rects {
			self.add_rectangle(rect);
		}
	}

	/// Whether `query` is entirely covered.
	///
	/// An invalid (empty) query counts as covered.
	pub fn is_completely_covered(&self, query: &IntRect) -> bool {
		if !query.is_valid() {
			return true;
		}

		let mut residue = vec![*query];
		let mut next = Vec::new();
		for piece in &self.pieces {
			for r in &residue {
				subtract(r, piece, &mut next);
			}
			residue.clear();
			std::mem::swap(&mut residue, &mut next);
			if residue.is_empty() {
				return true;
			}
		}

		residue.is_empty()
	}

	/// The covered area within `query`, in pixels.
	pub fn calc_area_of_intersection_with_rectangle(&self, query: &IntRect) -> i64 {
		self.pieces
			.iter()
			.map(|piece| piece.intersect(query).area())
			.sum()
	}
}

/// Decide which of an ordered list of rectangles are visible within `roi`.
///
/// `rects` is in painting order: element 0 is drawn first (bottom), the last
/// element is drawn last (top). Scanning top to bottom, a rectangle whose
/// ROI-clipped part is already fully claimed by rectangles above it cannot
/// contribute a pixel and is dropped. The returned indices are the visible
/// subset, in the original bottom-to-top painting order.
pub(crate) fn check_for_visibility(roi: &IntRect, rects: &[IntRect]) -> Vec<usize> {
	if !roi.is_valid() {
		return Vec::new();
	}

	let mut visible = Vec::new();
	let mut coverage = RectangleCoverageCalculator::new();
	for index in (0..rects.len()).rev() {
		let clipped = rects[index].intersect(roi);
		if !clipped.is_valid() {
			continue;
		}
		if coverage.is_completely_covered(&clipped) {
			continue;
		}

		coverage.add_rectangle(clipped);
		visible.push(index);
	}

	visible.reverse();
	visible
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Paint-the-pixels reference for the covered-area computation.
	fn reference_covered_area(rects: &[IntRect], query: &IntRect) -> i64 {
		let mut grid = vec![false; (query.w * query.h) as usize];
		for rect in rects {
			let clipped = rect.intersect(query);
			if !clipped.is_valid() {
				continue;
			}
			for y in clipped.y..clipped.y + clipped.h {
				for x in clipped.x..clipped.x + clipped.w {
					grid[((y - query.y) * query.w + (x - query.x)) as usize] = true;
				}
			}
		}

		grid.iter().filter(|&&set| set).count() as i64
	}

	struct XorShift(u64);

	impl XorShift {
		fn next(&mut self, bound: u32) -> i32 {
			self.0 ^= self.0 << 13;
			self.0 ^= self.0 >> 7;
			self.0 ^= self.0 << 17;
			(self.0 % u64::from(bound)) as i32
		}
	}

	#[test]
	fn fully_covering_rectangle_wins_alone() {
		// bottom (0,0,2,1) is fully inside the later (0,0,3,3)
		let rects = [IntRect::new(0, 0, 2, 1), IntRect::new(0, 0, 3, 3)];
		let visible = check_for_visibility(&IntRect::new(0, 0, 3, 3), &rects);
		assert_eq!(visible, vec![1]);
	}

	#[test]
	fn partially_covered_rectangles_stay_visible() {
		let rects = [
			IntRect::new(0, 0, 1, 3),
			IntRect::new(0, 1, 1, 1),
			IntRect::new(0, 2, 1, 1),
			IntRect::new(0, 0, 1, 1),
			IntRect::new(1, 0, 2, 3),
		];
		let visible = check_for_visibility(&IntRect::new(0, 0, 3, 3), &rects);
		assert_eq!(visible, vec![1, 2, 3, 4]);
	}

	#[test]
	fn empty_roi_sees_nothing() {
		let rects = [IntRect::new(0, 0, 5, 5), IntRect::new(1, 1, 2, 2)];
		assert!(check_for_visibility(&IntRect::new(0, 0, 0, 3), &rects).is_empty());
		assert!(check_for_visibility(&IntRect::new(0, 0, 3, 0), &rects).is_empty());
	}

	#[test]
	fn coincident_rectangles_leave_only_the_top() {
		let rects = [IntRect::new(0, 0, 2, 2); 3];
		let visible = check_for_visibility(&IntRect::new(1, 1, 1, 1), &rects);
		assert_eq!(visible, vec![2]);
	}

	#[test]
	fn coverage_area_matches_reference_on_random_input() {
		let query = IntRect::new(0, 0, 100, 100);
		let mut rng = XorShift(0x2545f4914f6cdd1d);
		for _ in 0..10 {
			let count = 1 + rng.next(100);
			let rects: Vec<IntRect> = (0..count)
				.map(|_| {
					IntRect::new(
						rng.next(100),
						rng.next(100),
						1 + rng.next(100),
						1 + rng.next(100),
					)
				})
				.collect();

			let mut calculator = RectangleCoverageCalculator::new();
			calculator.add_rectangles(rects.iter().copied());
			assert_eq!(
				calculator.calc_area_of_intersection_with_rectangle(&query),
				reference_covered_area(&rects, &query),
			);
		}
	}

	#[test]
	fn disjoint_invariant_holds_after_overlapping_adds() {
		let mut calculator = RectangleCoverageCalculator::new();
		calculator.add_rectangle(IntRect::new(0, 0, 4, 4));
		calculator.add_rectangle(IntRect::new(2, 2, 4, 4));
		calculator.add_rectangle(IntRect::new(0, 0, 6, 6));

		for (i, a) in calculator.pieces.iter().enumerate() {
			for b in calculator.pieces.iter().skip(i + 1) {
				assert!(!a.intersects(b), "pieces {a:?} and {b:?} overlap");
			}
		}
		assert_eq!(
			calculator.calc_area_of_intersection_with_rectangle(&IntRect::new(0, 0, 6, 6)),
			36
		);
	}
}
