pub mod customer_repo;
pub mod job_repo;
pub mod order_repo;
pub mod product_repo;
pub mod webhook_repo;
