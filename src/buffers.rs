// HTFE - device buffers (2D/3D images and rotating generations)

use crate::helpers::*;

/// A 2D map with one element per site, stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Image2D<T> {
    size: Int2,
    data: Vec<T>,
}

impl<T: Copy + Default> Image2D<T> {
    pub fn new(size: Int2) -> Self {
        Self {
            size,
            data: vec![T::default(); size.area()],
        }
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> Image2D<T> {
    pub fn size(&self) -> Int2 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, pos: Int2) -> &T {
        &self.data[address2(pos, self.size)]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// A 2D map with `depth` elements per site. Each site's elements are
/// contiguous so a dispatch can hand one site's slice to one invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Image3D<T> {
    size: Int3,
    data: Vec<T>,
}

impl<T: Copy + Default> Image3D<T> {
    pub fn new(size: Int3) -> Self {
        Self {
            size,
            data: vec![T::default(); size.x.max(0) as usize * size.y.max(0) as usize * size.z.max(0) as usize],
        }
    }
}

impl<T> Image3D<T> {
    pub fn size(&self) -> Int3 {
        self.size
    }

    /// Width and height of the site grid.
    pub fn size2(&self) -> Int2 {
        Int2::new(self.size.x, self.size.y)
    }

    pub fn depth(&self) -> usize {
        self.size.z as usize
    }

    pub fn get(&self, pos: Int3) -> &T {
        &self.data[address3(pos, self.size)]
    }

    /// All `depth` elements belonging to one site.
    pub fn site(&self, pos: Int2) -> &[T] {
        let depth = self.depth();
        let start = address2(pos, self.size2()) * depth;
        &self.data[start..start + depth]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Scalar activity of a map element, so kernels can read plain value maps and
/// two-channel state maps alike.
pub trait Activity {
    fn activity(&self) -> f32;
}

impl Activity for f32 {
    fn activity(&self) -> f32 {
        *self
    }
}

impl Activity for Float2 {
    fn activity(&self) -> f32 {
        self.x
    }
}

/// A read-only view of a map feeding a kernel: either a value map (the input
/// frame, decoded reconstructions) or a state map whose activity is in `x`.
#[derive(Clone, Copy, Debug)]
pub enum Plane<'a> {
    Values(&'a Image2D<f32>),
    States(&'a Image2D<Float2>),
}

impl<'a> Plane<'a> {
    pub fn size(&self) -> Int2 {
        match self {
            Plane::Values(image) => image.size(),
            Plane::States(image) => image.size(),
        }
    }

    #[inline]
    pub fn value(&self, pos: Int2) -> f32 {
        match self {
            Plane::Values(image) => image.get(pos).activity(),
            Plane::States(image) => image.get(pos).activity(),
        }
    }
}

impl<'a> From<&'a Image2D<f32>> for Plane<'a> {
    fn from(image: &'a Image2D<f32>) -> Self {
        Plane::Values(image)
    }
}

impl<'a> From<&'a Image2D<Float2>> for Plane<'a> {
    fn from(image: &'a Image2D<Float2>) -> Self {
        Plane::States(image)
    }
}

// --- CircleBuffer ---

/// A fixed ring of buffer generations. `front()` is the generation being
/// written this step, `get(1)` the previous step's, `get(2)` the one before.
/// `push_front` recycles the oldest generation as the new front, which is the
/// step rotation: no data moves, only the start index.
#[derive(Clone, Debug)]
pub struct CircleBuffer<T> {
    pub data: Vec<T>,
    pub start: usize,
}

impl<T: Clone> CircleBuffer<T> {
    /// A ring of `generations` copies of `value`.
    pub fn with_generations(generations: usize, value: T) -> Self {
        Self {
            data: vec![value; generations],
            start: 0,
        }
    }

    /// Copy the front generation over every older one.
    pub fn snapshot_front(&mut self) {
        let front = self.data[self.start].clone();
        for (i, slot) in self.data.iter_mut().enumerate() {
            if i != self.start {
                slot.clone_from(&front);
            }
        }
    }
}

impl<T> CircleBuffer<T> {
    pub fn push_front(&mut self) {
        if self.data.is_empty() {
            return;
        }
        if self.start == 0 {
            self.start = self.data.len() - 1;
        } else {
            self.start -= 1;
        }
    }

    pub fn front(&self) -> &T {
        &self.data[self.start]
    }

    pub fn front_mut(&mut self) -> &mut T {
        &mut self.data[self.start]
    }

    pub fn get(&self, index: usize) -> &T {
        &self.data[(self.start + index) % self.data.len()]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut T {
        let len = self.data.len();
        &mut self.data[(self.start + index) % len]
    }

    /// The front generation for writing alongside the previous one for reading.
    pub fn front_and_prev_mut(&mut self) -> (&mut T, &T) {
        let len = self.data.len();
        let prev = (self.start + 1) % len;
        split_pair_mut(&mut self.data, self.start, prev)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
