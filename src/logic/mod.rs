pub mod derive;
pub mod deserialize;
pub mod identity_cache;
pub mod linking;
pub mod serialize;
pub mod service;

pub use deserialize::{WriteContext, WriteEngine};
pub use identity_cache::IdentityCache;
pub use serialize::serialize_entity;
pub use service::CatalogService;
