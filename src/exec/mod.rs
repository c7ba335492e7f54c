//! Sandboxed execution primitives shared by the backends.

pub mod isolated;
pub mod sandbox;
pub mod shm;

pub use isolated::spawn_isolated;
pub use sandbox::{sandbox_for, PrivilegeSandbox, Sandbox, Unconfined};
pub use shm::SharedMemoryChannel;
