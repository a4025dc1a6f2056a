// Embedding API
// Everything a host application touches: contexts, handles, conversions and bindings

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod module;
pub mod runnable;
mod trampoline;
pub mod value;

pub use config::Config;
pub use context::Context;
pub use convert::{FromValue, HostValue, IntoArgs, IntoValue};
pub use error::{Error, Result};
pub use module::Module;
pub use runnable::{Runnable, RunnableState};
pub use trampoline::HostFn;
pub use value::{Value, ValueTag};
