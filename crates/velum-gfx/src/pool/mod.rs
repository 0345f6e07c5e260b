pub mod deferred_release;
pub mod transient_heap;
