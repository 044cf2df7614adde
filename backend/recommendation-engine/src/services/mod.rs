pub mod clusters;
pub mod embedder;
pub mod profile;
pub mod resolve;
pub mod sequence;

pub use clusters::{ClusterCatalog, ClusterMatcher};
pub use embedder::{OnnxTextEmbedder, TextEncoder};
pub use profile::update_profile;
pub use resolve::VectorResolver;
pub use sequence::{SequenceRecommender, TrainingJob, TrainingQueue};
