//! Third-party crates that are shared by all crates of the workspace.
//!
//! Depending on the crates through this one keeps the versions in the workspace aligned.

pub use byte_unit;
pub use chrono;
pub use crossbeam_channel;
pub use log;
pub use parking_lot;
pub use pathdiff;
pub use regex;
pub use thiserror;
pub use walkdir;

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}
