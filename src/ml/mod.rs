pub mod augmentation;
pub mod classifier;
pub mod preprocess;
#[cfg(feature = "ml")]
pub mod ml_model;
#[cfg(feature = "ml")]
pub mod training;
#[cfg(feature = "ml")]
pub mod inference;

pub use augmentation::{AugmentParams, AugmentationSettings};
pub use classifier::{argmax, Classifier};
pub use preprocess::{preprocess_image, PreprocessError, PreprocessedImage};
#[cfg(feature = "ml")]
pub use ml_model::{ModelConfig, TumorClassifier};
#[cfg(feature = "ml")]
pub use training::{train_model, ScanDataset, TrainingOutcome, TrainingReport};
#[cfg(feature = "ml")]
pub use inference::{load_classifier, InferenceEngine};
