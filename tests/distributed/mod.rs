mod cross_instance_single_flight;
mod lock_contention;
