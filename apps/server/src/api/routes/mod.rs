mod tasks;

pub use tasks::task_routes;
