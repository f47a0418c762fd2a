//! Host-side device primitives: streams, completion signals, mirrors and
//! the kernel invoker.

pub mod invoker;
pub mod mirror;
pub mod signal;
pub mod stream;

pub use invoker::KernelInvoker;
pub use mirror::DeviceMirror;
pub use signal::CompletionSignal;
pub use stream::Stream;
