pub mod common;
pub mod entity;
pub mod principal;
pub mod property;
pub mod registry;
pub mod relationship;
pub mod resource;
pub mod shape;

pub use common::*;
pub use entity::*;
pub use principal::*;
pub use property::*;
pub use registry::*;
pub use relationship::*;
pub use resource::*;
pub use shape::*;
