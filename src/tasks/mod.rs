mod worker;

pub use worker::WorkerTask;
