//! Anchor template generation and lattice tiling for the RPN head.
//!
//! Boxes are `(x1, y1, x2, y2)` rows with the pixel-inclusive convention
//! (`width = x2 - x1 + 1`), matching the rest of the `rcnn` primitives.

use ndarray::{array, Array1, Array2, Axis, s};

fn whctrs(anchor: &Array1<f32>) -> (f32, f32, f32, f32) {
    let w = anchor[2] - anchor[0] + 1.0;
    let h = anchor[3] - anchor[1] + 1.0;
    let x_ctr = anchor[0] + 0.5 * (w - 1.0);
    let y_ctr = anchor[1] + 0.5 * (h - 1.0);
    (w, h, x_ctr, y_ctr)
}

fn mkanchors(ws: Array1<f32>, hs: Array1<f32>, x_ctr: f32, y_ctr: f32) -> Array2<f32> {
    Array2::from_shape_fn((ws.len(), 4), |(i, j)| match j {
        0 => x_ctr - 0.5 * (ws[i] - 1.0),
        1 => y_ctr - 0.5 * (hs[i] - 1.0),
        2 => x_ctr + 0.5 * (ws[i] - 1.0),
        3 => y_ctr + 0.5 * (hs[i] - 1.0),
        _ => unreachable!(),
    })
}

fn ratio_enum(anchor: &Array1<f32>, ratios: &Array1<f32>) -> Array2<f32> {
    let (w, h, x_ctr, y_ctr) = whctrs(anchor);
    let size = w * h;
    let size_ratios = size / ratios;
    let ws = size_ratios.mapv(|sr| sr.sqrt().round());
    let hs = (&ws * ratios).mapv(f32::round);
    mkanchors(ws, hs, x_ctr, y_ctr)
}

fn scale_enum(anchor: &Array1<f32>, scales: &Array1<f32>) -> Array2<f32> {
    let (w, h, x_ctr, y_ctr) = whctrs(anchor);
    let ws = scales.mapv(|scale| w * scale);
    let hs = scales.mapv(|scale| h * scale);
    mkanchors(ws, hs, x_ctr, y_ctr)
}

/// Enumerate the base anchor set for one feature level: a `base_size` square
/// window around the origin, spread over the given aspect ratios, each then
/// blown up by the given scales. Returns `(ratios.len() * scales.len(), 4)`.
pub fn generate_anchors(base_size: usize, ratios: &Array1<f32>, scales: &Array1<f32>) -> Array2<f32> {
    let base_anchor = array![0.0, 0.0, base_size as f32 - 1.0, base_size as f32 - 1.0];
    let ratio_anchors = ratio_enum(&base_anchor, ratios);

    ratio_anchors
        .axis_iter(Axis(0))
        .map(|anchor| scale_enum(&anchor.to_owned(), scales))
        .fold(Array2::<f32>::zeros((0, 4)), |acc, x| {
            let mut result = Array2::<f32>::zeros((acc.nrows() + x.nrows(), 4));
            result.slice_mut(s![..acc.nrows(), ..]).assign(&acc);
            result.slice_mut(s![acc.nrows().., ..]).assign(&x);
            result
        })
}

/// Tile the base anchors over a `height x width` stride grid.
///
/// Output row `i = (row * width + col) * A + k` is base anchor `k` shifted by
/// `(col * feat_stride, row * feat_stride)`. Consumers reshape the flat
/// population back into `(height, width, A)` blocks, so this index layout is
/// a contract, not an implementation detail.
pub fn shift_anchors(
    base_anchors: &Array2<f32>,
    height: usize,
    width: usize,
    feat_stride: usize,
) -> Array2<f32> {
    let a = base_anchors.nrows();
    let mut all_anchors = Array2::<f32>::zeros((height * width * a, 4));

    for row in 0..height {
        let shift_y = (row * feat_stride) as f32;
        for col in 0..width {
            let shift_x = (col * feat_stride) as f32;
            let cell = row * width + col;
            for k in 0..a {
                let i = cell * a + k;
                all_anchors[[i, 0]] = base_anchors[[k, 0]] + shift_x;
                all_anchors[[i, 1]] = base_anchors[[k, 1]] + shift_y;
                all_anchors[[i, 2]] = base_anchors[[k, 2]] + shift_x;
                all_anchors[[i, 3]] = base_anchors[[k, 3]] + shift_y;
            }
        }
    }

    all_anchors
}
