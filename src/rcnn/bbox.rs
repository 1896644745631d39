//! Pairwise box overlap and the box regression codec.

use ndarray::{stack, Array2, ArrayView2, Axis, s};

/// Pairwise intersection-over-union between `boxes` (N, 4) and
/// `query_boxes` (K, 4). Returns an (N, K) matrix; disjoint pairs are 0.
pub fn bbox_overlaps(boxes: ArrayView2<f32>, query_boxes: ArrayView2<f32>) -> Array2<f32> {
    let n = boxes.nrows();
    let k = query_boxes.nrows();
    let mut overlaps = Array2::<f32>::zeros((n, k));

    for k_idx in 0..k {
        let query_area = (query_boxes[[k_idx, 2]] - query_boxes[[k_idx, 0]] + 1.0)
            * (query_boxes[[k_idx, 3]] - query_boxes[[k_idx, 1]] + 1.0);

        for n_idx in 0..n {
            let iw = (boxes[[n_idx, 2]].min(query_boxes[[k_idx, 2]])
                - boxes[[n_idx, 0]].max(query_boxes[[k_idx, 0]])
                + 1.0)
                .max(0.0);
            if iw > 0.0 {
                let ih = (boxes[[n_idx, 3]].min(query_boxes[[k_idx, 3]])
                    - boxes[[n_idx, 1]].max(query_boxes[[k_idx, 1]])
                    + 1.0)
                    .max(0.0);
                if ih > 0.0 {
                    let box_area = (boxes[[n_idx, 2]] - boxes[[n_idx, 0]] + 1.0)
                        * (boxes[[n_idx, 3]] - boxes[[n_idx, 1]] + 1.0);
                    let union = box_area + query_area - iw * ih;
                    overlaps[[n_idx, k_idx]] = iw * ih / union;
                }
            }
        }
    }

    overlaps
}

/// Encode the transform from each example box to its ground-truth box as
/// `(dx, dy, dw, dh)`: center offsets normalized by the example size, and
/// log size ratios. Both inputs are (N, 4) with matching rows.
pub fn bbox_transform(ex_rois: ArrayView2<f32>, gt_rois: ArrayView2<f32>) -> Array2<f32> {
    assert_eq!(ex_rois.nrows(), gt_rois.nrows(), "inconsistent rois number");

    let ex_widths = &ex_rois.slice(s![.., 2]) - &ex_rois.slice(s![.., 0]) + 1.0;
    let ex_heights = &ex_rois.slice(s![.., 3]) - &ex_rois.slice(s![.., 1]) + 1.0;
    let ex_ctr_x = &ex_rois.slice(s![.., 0]) + &(0.5 * (&ex_widths - 1.0));
    let ex_ctr_y = &ex_rois.slice(s![.., 1]) + &(0.5 * (&ex_heights - 1.0));

    let gt_widths = &gt_rois.slice(s![.., 2]) - &gt_rois.slice(s![.., 0]) + 1.0;
    let gt_heights = &gt_rois.slice(s![.., 3]) - &gt_rois.slice(s![.., 1]) + 1.0;
    let gt_ctr_x = &gt_rois.slice(s![.., 0]) + &(0.5 * (&gt_widths - 1.0));
    let gt_ctr_y = &gt_rois.slice(s![.., 1]) + &(0.5 * (&gt_heights - 1.0));

    let targets_dx = (&gt_ctr_x - &ex_ctr_x) / &ex_widths;
    let targets_dy = (&gt_ctr_y - &ex_ctr_y) / &ex_heights;
    let targets_dw = (&gt_widths / &ex_widths).mapv(f32::ln);
    let targets_dh = (&gt_heights / &ex_heights).mapv(f32::ln);

    stack![Axis(1), targets_dx, targets_dy, targets_dw, targets_dh]
}

/// Inverse of [`bbox_transform`]: apply `(dx, dy, dw, dh)` deltas to boxes.
/// Accepts deltas with any multiple of 4 columns (one 4-tuple per class).
pub fn bbox_transform_inv(boxes: ArrayView2<f32>, deltas: ArrayView2<f32>) -> Array2<f32> {
    if boxes.nrows() == 0 {
        return Array2::zeros((0, deltas.ncols()));
    }

    let widths = &boxes.slice(s![.., 2]) - &boxes.slice(s![.., 0]) + 1.0;
    let heights = &boxes.slice(s![.., 3]) - &boxes.slice(s![.., 1]) + 1.0;
    let ctr_x = &boxes.slice(s![.., 0]) + &(0.5 * (&widths - 1.0));
    let ctr_y = &boxes.slice(s![.., 1]) + &(0.5 * (&heights - 1.0));

    let mut pred_boxes = Array2::<f32>::zeros(deltas.raw_dim());
    for j in (0..deltas.ncols()).step_by(4) {
        for i in 0..deltas.nrows() {
            let pred_ctr_x = deltas[[i, j]] * widths[i] + ctr_x[i];
            let pred_ctr_y = deltas[[i, j + 1]] * heights[i] + ctr_y[i];
            let pred_w = deltas[[i, j + 2]].exp() * widths[i];
            let pred_h = deltas[[i, j + 3]].exp() * heights[i];

            pred_boxes[[i, j]] = pred_ctr_x - 0.5 * (pred_w - 1.0);
            pred_boxes[[i, j + 1]] = pred_ctr_y - 0.5 * (pred_h - 1.0);
            pred_boxes[[i, j + 2]] = pred_ctr_x + 0.5 * (pred_w - 1.0);
            pred_boxes[[i, j + 3]] = pred_ctr_y + 0.5 * (pred_h - 1.0);
        }
    }

    pred_boxes
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::rcnn::bbox::{bbox_overlaps, bbox_transform, bbox_transform_inv};

    #[test]
    fn test_bbox_overlaps() {
        let boxes = array![
            [0.0, 0.0, 9.0, 9.0],
            [0.0, 0.0, 9.0, 9.0],
            [100.0, 100.0, 109.0, 109.0],
        ];
        let query = array![[0.0, 0.0, 9.0, 9.0], [5.0, 5.0, 14.0, 14.0]];

        let overlaps = bbox_overlaps(boxes.view(), query.view());
        assert_eq!(overlaps.shape(), &[3, 2]);
        assert_eq!(overlaps[[0, 0]], 1.0);
        // 5x5 intersection over 175 union
        assert!((overlaps[[0, 1]] - 25.0 / 175.0).abs() < 1e-6);
        assert_eq!(overlaps[[2, 0]], 0.0);
        assert_eq!(overlaps[[2, 1]], 0.0);
    }

    #[test]
    fn test_bbox_overlaps_no_query_boxes() {
        let boxes = array![[0.0, 0.0, 9.0, 9.0]];
        let query = ndarray::Array2::<f32>::zeros((0, 4));
        let overlaps = bbox_overlaps(boxes.view(), query.view());
        assert_eq!(overlaps.shape(), &[1, 0]);
    }

    #[test]
    fn test_bbox_transform_identity_and_shift() {
        let ex = array![[0.0, 0.0, 9.0, 9.0], [0.0, 0.0, 9.0, 9.0]];
        let gt = array![[0.0, 0.0, 9.0, 9.0], [5.0, 0.0, 14.0, 9.0]];

        let targets = bbox_transform(ex.view(), gt.view());
        assert_eq!(targets.shape(), &[2, 4]);
        for c in 0..4 {
            assert!(targets[[0, c]].abs() < 1e-6);
        }
        // shifted right by half a width, same size
        assert!((targets[[1, 0]] - 0.5).abs() < 1e-6);
        assert!(targets[[1, 1]].abs() < 1e-6);
        assert!(targets[[1, 2]].abs() < 1e-6);
        assert!(targets[[1, 3]].abs() < 1e-6);
    }

    #[test]
    fn test_bbox_transform_inv_applies_deltas() {
        let boxes = array![[0.0, 0.0, 9.0, 9.0]];
        let deltas = array![[0.5, 0.0, 0.0, (2.0f32).ln()]];

        let pred = bbox_transform_inv(boxes.view(), deltas.view());
        // center moves to (9.5, 4.5), height doubles to 20
        assert!((pred[[0, 0]] - 5.0).abs() < 1e-4);
        assert!((pred[[0, 1]] - (-5.0)).abs() < 1e-4);
        assert!((pred[[0, 2]] - 14.0).abs() < 1e-4);
        assert!((pred[[0, 3]] - 14.0).abs() < 1e-4);
    }
}
