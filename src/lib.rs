pub mod error;
pub mod processing;
pub mod rcnn;

pub use error::{Error, Result};
pub use processing::anchor_target::{
    anchor_targets, AnchorTargetConfig, AnchorTargets, FeatureMapSize, ImageInfo,
};
pub use processing::stats::{BatchStats, RunningStats, StatsSink};
