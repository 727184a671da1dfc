pub mod cleanup;
pub mod hex;
pub mod notify;
pub mod pg;
pub mod queue;
pub mod rota;
