pub mod model;
pub mod store;

pub use model::{NewBlob, StoredBlob, StoredReport, UploadTarget};
pub use store::RetainedBlobStore;
