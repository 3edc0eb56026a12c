pub mod builders;
pub mod store;

pub use builders::{BundleBuilder, EntityBuilder};
pub use store::TestStore;
