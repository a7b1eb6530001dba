//! Service layer: storage, hashing, the upload state machine, variant
//! generation, CSV import and image-reference resolution.

pub mod blob_store;
pub mod checksum;
pub mod csv_import;
pub mod import_service;
pub mod locks;
pub mod resolver;
pub mod upload_service;
pub mod variant_service;
