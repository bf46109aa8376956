// Activity inference over buffered sensor windows
//
// `features` turns a run of samples into motion features, `classifier`
// holds the replaceable model seam and the threshold-gating wrapper, and
// `heuristic` is the decision-rule model that ships with the engine.

pub mod classifier;
pub mod features;
pub mod heuristic;

pub use classifier::{ActivityClassifier, ActivityModel, ScoredLabel};
pub use features::{FeatureExtractor, MotionFeatures};
pub use heuristic::HeuristicModel;
