mod model;

pub use model::Thread;
