mod container;

pub use container::RawContainer;
