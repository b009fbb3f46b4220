// HTFE - compute kernels
//
// Every kernel runs one invocation per site of its write target and reads
// only the immutable views in its argument record.

pub mod activate;
pub mod blur;
pub mod inhibit;
pub mod init;
pub mod learn;
pub mod reconstruct;

pub use activate::*;
pub use blur::*;
pub use inhibit::*;
pub use init::*;
pub use learn::*;
pub use reconstruct::*;

use crate::buffers::{Image3D, Plane};
use crate::helpers::*;

/// A square receptive field clipped to the bounds of the map it reads.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Window {
    lower: Int2,
    iter_lower: Int2,
    iter_upper: Int2,
    diam: i32,
}

impl Window {
    pub(crate) fn around(center: Int2, radius: i32, bounds: Int2) -> Self {
        let lower = Int2::new(center.x - radius, center.y - radius);
        Self {
            lower,
            iter_lower: Int2::new(lower.x.max(0), lower.y.max(0)),
            iter_upper: Int2::new(
                (center.x + radius).min(bounds.x - 1),
                (center.y + radius).min(bounds.y - 1),
            ),
            diam: radius * 2 + 1,
        }
    }

    /// Number of in-bounds sites covered by the window.
    pub(crate) fn count(&self) -> usize {
        let w = (self.iter_upper.x - self.iter_lower.x + 1).max(0);
        let h = (self.iter_upper.y - self.iter_lower.y + 1).max(0);
        (w * h) as usize
    }

    /// Visit every in-bounds position with its weight slot.
    #[inline]
    pub(crate) fn for_each(&self, mut f: impl FnMut(Int2, usize)) {
        for y in self.iter_lower.y..=self.iter_upper.y {
            for x in self.iter_lower.x..=self.iter_upper.x {
                let wi = (x - self.lower.x) + (y - self.lower.y) * self.diam;
                f(Int2::new(x, y), wi as usize);
            }
        }
    }
}

/// Center of the field that site `pos` of a `from` map reads in a `to` map.
#[inline]
pub(crate) fn field_center(pos: Int2, from: Int2, to: Int2) -> Int2 {
    project(pos, size_ratio(from, to))
}

/// Weighted sum of `input` over the window of one hidden site, without bias.
pub(crate) fn forward_sum(input: Plane<'_>, site_weights: &[Float2], center: Int2, radius: i32) -> f32 {
    let mut sum = 0.0;
    Window::around(center, radius, input.size()).for_each(|pos, wi| {
        sum += input.value(pos) * site_weights[wi].x;
    });
    sum
}

/// Radius over the hidden map that contains every hidden site whose forward
/// window of `radius` can cover a given visible site.
pub(crate) fn reverse_radii(radius: i32, visible_to_hidden: Float2) -> Int2 {
    Int2::new(
        ((radius + 1) as f32 * visible_to_hidden.x).ceil() as i32 + 1,
        ((radius + 1) as f32 * visible_to_hidden.y).ceil() as i32 + 1,
    )
}

/// Transposed pass: sum of `hidden` activity times the weight that connects
/// each covering hidden site to `visible_pos`.
pub(crate) fn reverse_sum(
    visible_pos: Int2,
    visible_size: Int2,
    hidden: Plane<'_>,
    weights: &Image3D<Float2>,
    radius: i32,
) -> f32 {
    let hidden_size = weights.size2();
    let visible_to_hidden = size_ratio(visible_size, hidden_size);
    let hidden_to_visible = size_ratio(hidden_size, visible_size);
    let reverse = reverse_radii(radius, visible_to_hidden);
    let hidden_center = project(visible_pos, visible_to_hidden);
    let diam = radius * 2 + 1;

    let lower = Int2::new((hidden_center.x - reverse.x).max(0), (hidden_center.y - reverse.y).max(0));
    let upper = Int2::new(
        (hidden_center.x + reverse.x).min(hidden_size.x - 1),
        (hidden_center.y + reverse.y).min(hidden_size.y - 1),
    );

    let mut sum = 0.0;
    for hy in lower.y..=upper.y {
        for hx in lower.x..=upper.x {
            let h = Int2::new(hx, hy);
            let visible_center = project(h, hidden_to_visible);
            let offset = Int2::new(
                visible_pos.x - (visible_center.x - radius),
                visible_pos.y - (visible_center.y - radius),
            );
            if in_bounds0(offset, Int2::new(diam, diam)) {
                let wi = (offset.x + offset.y * diam) as usize;
                sum += hidden.value(h) * weights.site(h)[wi].x;
            }
        }
    }
    sum
}

/// Momentum update of one weight: `α·(grad − λ·w) + momentum·Δprev`.
#[inline]
pub(crate) fn momentum_step(prev: Float2, grad: f32, alpha: f32, lambda: f32, momentum: f32) -> Float2 {
    let delta = alpha * (grad - lambda * prev.x) + momentum * prev.y;
    Float2::new(prev.x + delta, delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::Image2D;

    #[test]
    fn window_clips_to_bounds() {
        let w = Window::around(Int2::new(0, 0), 2, Int2::new(8, 8));
        assert_eq!(w.count(), 9);
        let mut slots = Vec::new();
        w.for_each(|_, wi| slots.push(wi));
        // lower-right 3x3 corner of a 5x5 field
        assert_eq!(slots, vec![12, 13, 14, 17, 18, 19, 22, 23, 24]);
    }

    #[test]
    fn reverse_sum_is_transpose_of_forward_sum() {
        let visible_size = Int2::new(6, 6);
        let hidden_size = Int2::new(3, 3);
        let radius = 2;
        let depth = ((radius * 2 + 1) * (radius * 2 + 1)) as i32;

        let mut weights = Image3D::<Float2>::new(Int3::new(hidden_size.x, hidden_size.y, depth));
        for (i, w) in weights.data_mut().iter_mut().enumerate() {
            w.x = ((i * 7919) % 13) as f32 / 13.0 - 0.5;
        }

        // <hidden, W x> == <W^T hidden, x> for one-hot x and hidden
        for v in 0..visible_size.area() {
            let mut visible = Image2D::<f32>::new(visible_size);
            visible.data_mut()[v] = 1.0;
            for h in 0..hidden_size.area() {
                let mut hidden = Image2D::<f32>::new(hidden_size);
                hidden.data_mut()[h] = 1.0;

                let hp = site_position(h, hidden_size);
                let center = field_center(hp, hidden_size, visible_size);
                let forward = forward_sum(Plane::from(&visible), weights.site(hp), center, radius);

                let vp = site_position(v, visible_size);
                let reverse = reverse_sum(vp, visible_size, Plane::from(&hidden), &weights, radius);

                assert_eq!(forward, reverse, "visible {v} hidden {h}");
            }
        }
    }
}
