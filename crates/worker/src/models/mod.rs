//! 内置模型

pub mod random_walk;

pub use random_walk::{RandomWalk, RandomWalkFactory, RANDOM_WALK};
