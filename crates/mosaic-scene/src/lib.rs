//! Element scene, mutation tracking and the renderer that keeps mosaics in
//! sync with it.

pub mod mutation;
pub mod renderer;
pub mod scene;
pub mod tasks;

pub use mosaic_config::MosaicConfig;
pub use mosaic_core;
pub use mutation::{Mutation, MutationQueue, SubscriptionToken};
pub use renderer::Renderer;
pub use scene::Scene;
pub use tasks::{Task, TaskQueue, TaskSender, Waker};
