//! RPN anchor target assignment.
//!
//! Tiles the base anchors over the feature map grid, matches them against the
//! ground-truth boxes of one image, and produces classification labels, box
//! regression targets and loss weights for the RPN head. Outputs are indexed
//! by the flat anchor population order defined in [`shift_anchors`]; the host
//! is responsible for any further reshape into its own tensor layout.

use ndarray::{Array1, Array2, Axis, s};
use rand::seq::index::sample;
use rand::Rng;

use crate::error::{Error, Result};
use crate::processing::stats::{BatchStats, StatsSink};
use crate::rcnn::anchors::shift_anchors;
use crate::rcnn::bbox::{bbox_overlaps, bbox_transform};

/// Parameters for one target-assignment invocation.
#[derive(Debug, Clone)]
pub struct AnchorTargetConfig {
    /// Pixel distance between adjacent feature map cells.
    pub feat_stride: usize,
    /// How far an anchor may hang over the image edge and still be used.
    pub allowed_border: f32,
    /// IoU at or above which an anchor is positive.
    pub positive_overlap: f32,
    /// IoU below which an anchor is negative.
    pub negative_overlap: f32,
    /// When set, the negative-overlap pass runs last and can demote anchors
    /// that the positive passes selected, including per-gt best anchors.
    pub clobber_positives: bool,
    /// Total number of anchors sampled for the loss.
    pub batch_size: usize,
    /// Fraction of the batch reserved for positive anchors.
    pub fg_fraction: f32,
    /// Inside weight given to each coordinate of positive anchors.
    pub bbox_inside_weights: [f32; 4],
    /// Negative: weight every sampled anchor uniformly by 1/num_examples.
    /// In (0, 1): give positives this total share and negatives the rest.
    pub positive_weight: f32,
}

impl Default for AnchorTargetConfig {
    fn default() -> Self {
        AnchorTargetConfig {
            feat_stride: 16,
            allowed_border: 0.0,
            positive_overlap: 0.7,
            negative_overlap: 0.3,
            clobber_positives: false,
            batch_size: 256,
            fg_fraction: 0.5,
            bbox_inside_weights: [1.0, 1.0, 1.0, 1.0],
            positive_weight: -1.0,
        }
    }
}

/// Spatial shape of the host's class-score blob.
#[derive(Debug, Clone, Copy)]
pub struct FeatureMapSize {
    pub num_images: usize,
    pub height: usize,
    pub width: usize,
}

/// Image dimensions in pixels; `scale` is carried for the host but unused.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub height: f32,
    pub width: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Positive,
    Negative,
    Ignore,
}

impl Label {
    fn to_f32(self) -> f32 {
        match self {
            Label::Positive => 1.0,
            Label::Negative => 0.0,
            Label::Ignore => -1.0,
        }
    }
}

/// Supervision arrays over the full anchor population (`K*A` rows).
/// Anchors filtered out by the border check carry `-1.0` labels and zero
/// targets/weights.
#[derive(Debug)]
pub struct AnchorTargets {
    pub labels: Array1<f32>,
    pub bbox_targets: Array2<f32>,
    pub bbox_inside_weights: Array2<f32>,
    pub bbox_outside_weights: Array2<f32>,
}

/// Assign RPN training targets for one image.
///
/// `base_anchors` is the `(A, 4)` template (see
/// [`generate_anchors`](crate::rcnn::anchors::generate_anchors)), `gt_boxes`
/// is `(M, 5)` rows of `(x1, y1, x2, y2, class)`; the class column is carried
/// but not consulted. `M = 0` is valid and produces a background-only
/// labeling. The subsampling draws come from `rng`; pass a seeded generator
/// for reproducible selections.
pub fn anchor_targets(
    cfg: &AnchorTargetConfig,
    base_anchors: &Array2<f32>,
    feat_size: &FeatureMapSize,
    gt_boxes: &Array2<f32>,
    im_info: &ImageInfo,
    rng: &mut impl Rng,
    stats: &mut impl StatsSink,
) -> Result<AnchorTargets> {
    if feat_size.num_images != 1 {
        return Err(Error::BatchSize(feat_size.num_images));
    }
    validate_positive_weight(cfg.positive_weight)?;

    let all_anchors = shift_anchors(base_anchors, feat_size.height, feat_size.width, cfg.feat_stride);
    let total_anchors = all_anchors.nrows();

    // keep anchors inside the image, up to the configured border slack
    let inds_inside: Vec<usize> = (0..total_anchors)
        .filter(|&i| {
            all_anchors[[i, 0]] >= -cfg.allowed_border
                && all_anchors[[i, 1]] >= -cfg.allowed_border
                && all_anchors[[i, 2]] < im_info.width + cfg.allowed_border
                && all_anchors[[i, 3]] < im_info.height + cfg.allowed_border
        })
        .collect();
    let anchors = all_anchors.select(Axis(0), &inds_inside);
    let k = inds_inside.len();

    let num_gt = gt_boxes.nrows();
    let overlaps = bbox_overlaps(anchors.view(), gt_boxes.slice(s![.., ..4]));

    // per-anchor best ground truth; zero overlap everywhere when there is none
    let mut max_overlaps = vec![0.0f32; k];
    let mut argmax_overlaps = vec![0usize; k];
    if num_gt > 0 {
        for i in 0..k {
            for j in 1..num_gt {
                if overlaps[[i, j]] > overlaps[[i, argmax_overlaps[i]]] {
                    argmax_overlaps[i] = j;
                }
            }
            max_overlaps[i] = overlaps[[i, argmax_overlaps[i]]];
        }
    }

    let mut labels = assign_labels(cfg, &overlaps, &max_overlaps);
    subsample_labels(&mut labels, cfg, rng);

    let bbox_targets = compute_targets(&anchors, gt_boxes, &argmax_overlaps);

    let mut bbox_inside_weights = Array2::<f32>::zeros((k, 4));
    for (i, label) in labels.iter().enumerate() {
        if *label == Label::Positive {
            for c in 0..4 {
                bbox_inside_weights[[i, c]] = cfg.bbox_inside_weights[c];
            }
        }
    }

    let (positive_weight, negative_weight) = outside_weights(cfg, &labels)?;
    let mut bbox_outside_weights = Array2::<f32>::zeros((k, 4));
    for (i, label) in labels.iter().enumerate() {
        let w = match label {
            Label::Positive => positive_weight,
            Label::Negative => negative_weight,
            Label::Ignore => continue,
        };
        for c in 0..4 {
            bbox_outside_weights[[i, c]] = w;
        }
    }

    stats.record(&batch_stats(total_anchors, &labels, &bbox_targets));

    Ok(AnchorTargets {
        labels: unmap_labels(&labels, total_anchors, &inds_inside),
        bbox_targets: unmap_rows(&bbox_targets, total_anchors, &inds_inside),
        bbox_inside_weights: unmap_rows(&bbox_inside_weights, total_anchors, &inds_inside),
        bbox_outside_weights: unmap_rows(&bbox_outside_weights, total_anchors, &inds_inside),
    })
}

fn validate_positive_weight(positive_weight: f32) -> Result<()> {
    if positive_weight < 0.0 || (positive_weight > 0.0 && positive_weight < 1.0) {
        Ok(())
    } else {
        Err(Error::PositiveWeight(positive_weight))
    }
}

/// Trinary labeling of the in-bounds anchors. The pass order is load-bearing:
/// with `clobber_positives` unset, background is written first so that the
/// per-gt best-anchor and threshold passes can overwrite it; with it set, the
/// background pass runs last and can demote any anchor below the negative
/// threshold, gt-best anchors included.
fn assign_labels(cfg: &AnchorTargetConfig, overlaps: &Array2<f32>, max_overlaps: &[f32]) -> Vec<Label> {
    let k = max_overlaps.len();
    let mut labels = vec![Label::Ignore; k];

    if !cfg.clobber_positives {
        for i in 0..k {
            if max_overlaps[i] < cfg.negative_overlap {
                labels[i] = Label::Negative;
            }
        }
    }

    // every gt's best-overlap anchor is positive regardless of threshold;
    // ties all count
    for j in 0..overlaps.ncols() {
        let gt_max = overlaps
            .column(j)
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        for i in 0..k {
            if overlaps[[i, j]] == gt_max {
                labels[i] = Label::Positive;
            }
        }
    }

    for i in 0..k {
        if max_overlaps[i] >= cfg.positive_overlap {
            labels[i] = Label::Positive;
        }
    }

    if cfg.clobber_positives {
        for i in 0..k {
            if max_overlaps[i] < cfg.negative_overlap {
                labels[i] = Label::Negative;
            }
        }
    }

    labels
}

/// Cap positives at `floor(fg_fraction * batch_size)` and negatives at the
/// remainder of the batch, demoting a uniform random excess to ignore.
fn subsample_labels(labels: &mut [Label], cfg: &AnchorTargetConfig, rng: &mut impl Rng) {
    let num_fg = (cfg.fg_fraction * cfg.batch_size as f32) as usize;
    let fg_inds: Vec<usize> = label_indices(labels, Label::Positive);
    if fg_inds.len() > num_fg {
        for pick in sample(rng, fg_inds.len(), fg_inds.len() - num_fg).iter() {
            labels[fg_inds[pick]] = Label::Ignore;
        }
    }

    let num_kept_fg = labels.iter().filter(|l| **l == Label::Positive).count();
    let num_bg = cfg.batch_size.saturating_sub(num_kept_fg);
    let bg_inds: Vec<usize> = label_indices(labels, Label::Negative);
    if bg_inds.len() > num_bg {
        for pick in sample(rng, bg_inds.len(), bg_inds.len() - num_bg).iter() {
            labels[bg_inds[pick]] = Label::Ignore;
        }
    }
}

fn label_indices(labels: &[Label], wanted: Label) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == wanted)
        .map(|(i, _)| i)
        .collect()
}

/// Regression targets from every in-bounds anchor toward its argmax ground
/// truth. Computed for all anchors; the inside weights zero out everything
/// that is not positive downstream.
fn compute_targets(anchors: &Array2<f32>, gt_boxes: &Array2<f32>, argmax_overlaps: &[usize]) -> Array2<f32> {
    if gt_boxes.nrows() == 0 {
        return Array2::zeros((anchors.nrows(), 4));
    }
    let matched = gt_boxes.select(Axis(0), argmax_overlaps);
    bbox_transform(anchors.view(), matched.slice(s![.., ..4]))
}

/// Scalar outside weight per label class. Uniform mode spreads unit mass over
/// all sampled anchors; fixed-ratio mode splits it `positive_weight` to
/// `1 - positive_weight` between the classes and requires both to be
/// populated.
fn outside_weights(cfg: &AnchorTargetConfig, labels: &[Label]) -> Result<(f32, f32)> {
    let num_positive = labels.iter().filter(|l| **l == Label::Positive).count();
    let num_negative = labels.iter().filter(|l| **l == Label::Negative).count();

    if cfg.positive_weight < 0.0 {
        let num_examples = num_positive + num_negative;
        if num_examples == 0 {
            // nothing sampled, nothing to weight
            return Ok((0.0, 0.0));
        }
        let w = 1.0 / num_examples as f32;
        Ok((w, w))
    } else {
        if num_positive == 0 || num_negative == 0 {
            return Err(Error::EmptyWeightClass {
                num_positive,
                num_negative,
            });
        }
        Ok((
            cfg.positive_weight / num_positive as f32,
            (1.0 - cfg.positive_weight) / num_negative as f32,
        ))
    }
}

fn batch_stats(total_anchors: usize, labels: &[Label], bbox_targets: &Array2<f32>) -> BatchStats {
    let mut stats = BatchStats {
        total_anchors,
        num_inside: labels.len(),
        ..BatchStats::default()
    };
    for (i, label) in labels.iter().enumerate() {
        match label {
            Label::Positive => {
                stats.num_positive += 1;
                for c in 0..4 {
                    let t = bbox_targets[[i, c]];
                    stats.fg_target_sum[c] += t;
                    stats.fg_target_squared_sum[c] += t * t;
                }
            }
            Label::Negative => stats.num_negative += 1,
            Label::Ignore => {}
        }
    }
    stats
}

fn unmap_labels(labels: &[Label], count: usize, inds_inside: &[usize]) -> Array1<f32> {
    let mut out = Array1::from_elem(count, -1.0);
    for (label, &i) in labels.iter().zip(inds_inside) {
        out[i] = label.to_f32();
    }
    out
}

fn unmap_rows(data: &Array2<f32>, count: usize, inds_inside: &[usize]) -> Array2<f32> {
    let mut out = Array2::zeros((count, 4));
    for (row, &i) in data.axis_iter(Axis(0)).zip(inds_inside) {
        out.row_mut(i).assign(&row);
    }
    out
}
