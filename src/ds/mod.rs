pub mod block_pool;
pub mod recency_list;
pub mod spsc_queue;

pub use block_pool::{BlockHandle, BlockPool, PooledBlock};
pub use recency_list::{NodeId, RecencyList};
pub use spsc_queue::{BoundedSpscQueue, Consumer, Producer};
