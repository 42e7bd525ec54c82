use crate::KernelElem;
use rayon::prelude::*;

/// Below this many elements the scale runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 1 << 14;

/// Multiplies every element of `data` by `alpha` in place.
///
/// This is the BLAS `scal` primitive. The gather layer uses it to rescale the gradient slice a
/// worker receives from the root, so the per-element work is tiny and only large buffers are
/// worth splitting across the rayon pool.
pub fn cpu_scale<T: KernelElem>(alpha: T, data: &mut [T]) {
    if data.len() < PARALLEL_THRESHOLD {
        data.iter_mut().for_each(|x| *x *= alpha);
    } else {
        data.par_iter_mut().for_each(|x| *x *= alpha);
    }
}
