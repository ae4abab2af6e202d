mod extension;
mod metadata;
mod request;

pub use extension::Container;
pub use metadata::{FormatDescriptor, FormatId, MediaKind, MetadataDocument};
pub use request::DownloadRequest;
