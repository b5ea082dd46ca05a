//! Tensor helpers built from candle primitives.

use candle_core::{Result, Tensor};

/// Upsamples an NCHW tensor by exactly 2× in both spatial dimensions using
/// bilinear interpolation with `align_corners = false`.
///
/// The result matches `torch.nn.functional.interpolate(x, scale_factor=2,
/// mode="bilinear", align_corners=False)`. For a scale of two every output
/// sample sits a quarter pixel away from an input sample, so each axis reduces
/// to `out[2k] = 0.75 * x[k] + 0.25 * x[k - 1]` and
/// `out[2k + 1] = 0.75 * x[k] + 0.25 * x[k + 1]` with the neighbour index
/// clamped at the borders. It is built from narrow/affine/stack ops, so it runs
/// on any device and stays differentiable.
pub fn upsample_bilinear_2x(xs: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    let xs = upsample_axis_2x(xs, 2, h)?;
    upsample_axis_2x(&xs, 3, w)
}

fn upsample_axis_2x(xs: &Tensor, dim: usize, len: usize) -> Result<Tensor> {
    if len == 0 {
        candle_core::bail!("cannot upsample an empty axis (dim {dim})");
    }

    let first = xs.narrow(dim, 0, 1)?;
    let last = xs.narrow(dim, len - 1, 1)?;
    let (prev, next) = if len > 1 {
        let prev = Tensor::cat(&[&first, &xs.narrow(dim, 0, len - 1)?], dim)?;
        let next = Tensor::cat(&[&xs.narrow(dim, 1, len - 1)?, &last], dim)?;
        (prev, next)
    } else {
        (first, last)
    };

    let center = xs.affine(0.75, 0.0)?;
    let even = center.add(&prev.affine(0.25, 0.0)?)?;
    let odd = center.add(&next.affine(0.25, 0.0)?)?;

    // [.., len, 2, ..] -> [.., 2 * len, ..] interleaves even and odd samples.
    let mut out_dims = xs.dims().to_vec();
    out_dims[dim] = len * 2;
    Tensor::stack(&[&even, &odd], dim + 1)?.reshape(out_dims)
}

/// Number of scalar elements held by a set of tensors.
pub fn element_count<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) -> usize {
    tensors.into_iter().map(|t| t.elem_count()).sum()
}
