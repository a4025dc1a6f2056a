pub mod caller;
pub mod gc;
pub mod interner;
pub mod runtime;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;

pub use caller::{HostFunction, NativeError, NativeResult, ValueCaller};
pub use gc::GcStats;
pub use runtime::Runtime;
pub use value::Value;
pub use vm::VM;
