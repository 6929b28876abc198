mod add;
mod allocator;
mod link;
mod registry;

pub use add::{AddCounters, AddRequest};
pub use allocator::PortAllocator;
pub use link::decode_link;
pub use registry::Registry;
