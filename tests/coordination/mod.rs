mod broadcast_and_eviction;
mod stats_collection;
