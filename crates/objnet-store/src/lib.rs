//! # objnet store
//!
//! Storage abstraction for objnet. The exchange and the node facade talk to
//! storage only through the [`ObjectStore`] trait; [`MemoryStore`] is the
//! in-process implementation used by tests and by nodes without persistence.
//!
//! ## Key Types
//!
//! - [`ObjectStore`] - The async trait for object lookup and persistence
//! - [`Filter`] - Object selection by type, owner, root or hash
//! - [`MemoryStore`] - In-memory storage
//!
//! ## Usage
//!
//! ```rust,no_run
//! use objnet_core::Object;
//! use objnet_store::{MemoryStore, ObjectStore};
//!
//! async fn example() {
//!     let store = MemoryStore::new();
//!     let object = Object::new("test/msg").with_field("body", "hello");
//!     let hash = store.put(&object).await.unwrap();
//!     let back = store.get(&hash).await.unwrap();
//!     assert_eq!(back, object);
//! }
//! ```

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{Filter, ObjectStore, StoreExt};
