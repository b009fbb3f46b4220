// HTFE - separable Gaussian blur kernels

use crate::buffers::Image2D;
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;

#[derive(Clone, Copy, Debug)]
pub struct GaussianBlurArgs<'a> {
    pub source: &'a Image2D<f32>,
    /// Standard deviation in sites.
    pub kernel_width: f32,
}

/// Normalized 1D Gaussian taps over `[-⌈2σ⌉, ⌈2σ⌉]`.
pub fn gaussian_taps(sigma: f32) -> Vec<f32> {
    let radius = (2.0 * sigma).ceil().max(0.0) as i32;
    let mut taps: Vec<f32> = (-radius..=radius)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = taps.iter().sum();
    if total > LIMIT_SMALL {
        for t in taps.iter_mut() {
            *t /= total;
        }
    }
    taps
}

pub fn gaussian_blur_x(cs: &ComputeSystem, kernel: &Kernel, args: GaussianBlurArgs<'_>, out: &mut Image2D<f32>) {
    debug_assert_eq!(kernel.id(), KernelId::GaussianBlurX);
    blur_axis(cs, kernel, args, Int2::new(1, 0), out);
}

pub fn gaussian_blur_y(cs: &ComputeSystem, kernel: &Kernel, args: GaussianBlurArgs<'_>, out: &mut Image2D<f32>) {
    debug_assert_eq!(kernel.id(), KernelId::GaussianBlurY);
    blur_axis(cs, kernel, args, Int2::new(0, 1), out);
}

fn blur_axis(cs: &ComputeSystem, kernel: &Kernel, args: GaussianBlurArgs<'_>, axis: Int2, out: &mut Image2D<f32>) {
    debug_assert_eq!(args.source.size(), out.size());

    let size = out.size();
    let taps = gaussian_taps(args.kernel_width);
    let radius = (taps.len() / 2) as i32;

    cs.dispatch(kernel, out.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let mut sum = 0.0;
        for (k, tap) in taps.iter().enumerate() {
            let d = k as i32 - radius;
            let sample = Int2::new(
                (pos.x + d * axis.x).clamp(0, size.x - 1),
                (pos.y + d * axis.y).clamp(0, size.y - 1),
            );
            sum += tap * args.source.get(sample);
        }
        site[0] = sum;
    });
}
