pub mod model_metadata;
pub mod model_storage;
pub mod tumor_info;
pub mod config;

pub use model_metadata::{ModelMetadata, METADATA_FORMAT_VERSION};
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, log_metadata_info, ModelBundleError};
pub use tumor_info::{TumorInfo, CLASS_NAMES, NUM_CLASSES, tumor_info};
pub use config::{AppConfig, DeviceType, ModelSettings, TrainingSettings, ServerSettings};
