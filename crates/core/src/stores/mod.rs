mod memory;
mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
