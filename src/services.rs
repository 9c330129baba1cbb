pub mod reconcile;
pub mod supervisor;
pub mod worker;
