//! Hook-driven managers.
//!
//! Managers are the cycle's standing behaviors, registered as hook handlers
//! in a fixed order: the blueprint manager fills in targets, the repository
//! manager builds and validates the repository, and the GC manager issues
//! `dolt gc` as statements accumulate.

pub mod blueprint;
pub mod gc;
pub mod repository;

pub use blueprint::BlueprintManager;
pub use gc::GcManager;
pub use repository::RepositoryManager;
