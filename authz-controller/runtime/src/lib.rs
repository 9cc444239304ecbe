#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use authz_controller_core as core;
pub use authz_controller_k8s_api as k8s;
pub use authz_controller_k8s_index as index;
pub use authz_controller_k8s_mirror as mirror;

mod args;
mod index_list;
mod lease;

pub use self::args::Args;
