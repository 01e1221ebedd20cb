pub mod cache;
pub mod memory;
pub mod postgrest;
pub mod store;
pub mod supabase;

pub use cache::{InMemoryReadModelCache, ReadModelCache, RedisReadModelCache};
pub use memory::InMemorySchedulingStore;
pub use postgrest::PostgrestSchedulingStore;
pub use store::{BookingStore, BusySnapshotStore, SchedulingStore, SlotStore, WindowStore};
