// HTFE - local inhibition kernel

use crate::buffers::Image2D;
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;
use crate::layer::{local_activity, window_area};

use super::Window;

#[derive(Clone, Copy, Debug)]
pub struct InhibitArgs<'a> {
    pub activations: &'a Image2D<f32>,
    /// Previous step's states; only the duty cycle (`y`) is read.
    pub prev_states: &'a Image2D<Float2>,
    pub radius: i32,
    pub sparsity: f32,
    pub duty_cycle_decay: f32,
}

/// k-winners-take-all over a sliding window.
///
/// Each site is scored by its activation plus a boost toward the target
/// sparsity. A site becomes active when fewer than the window's share of the
/// local activity target outscore it. Equal scores go to the lower site index.
pub fn inhibit(cs: &ComputeSystem, kernel: &Kernel, args: InhibitArgs<'_>, states: &mut Image2D<Float2>) {
    debug_assert_eq!(kernel.id(), KernelId::Inhibit);
    debug_assert_eq!(args.activations.size(), states.size());

    let size = states.size();
    let activity = local_activity(args.sparsity, args.radius);
    let area = window_area(args.radius) as f32;
    let score = |index: usize| {
        args.activations.data()[index] + (args.sparsity - args.prev_states.data()[index].y)
    };

    cs.dispatch(kernel, states.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let own = score(i);

        let window = Window::around(pos, args.radius, size);
        let mut num_higher = 0usize;
        window.for_each(|other, _| {
            let j = address2(other, size);
            if j != i {
                let s = score(j);
                if s > own || (s == own && j < i) {
                    num_higher += 1;
                }
            }
        });

        let target = activity * window.count() as f32 / area;
        let state = if (num_higher as f32) < target { 1.0 } else { 0.0 };
        let duty = (1.0 - args.duty_cycle_decay) * args.prev_states.data()[i].y
            + args.duty_cycle_decay * state;

        site[0] = Float2::new(state, duty);
    });
}
