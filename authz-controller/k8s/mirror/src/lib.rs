//! Binding Mirror
//!
//! Keeps legacy bindings and native RBAC bindings in step. A controller
//! watches one representation through a [`SourceIndex`], which enqueues the
//! key of every changed object on a [`Queue`]. Workers take keys from the
//! queue and bring the other representation in line with the latest source
//! object, creating, replacing or deleting it through a [`BindingStore`].
//!
//! ```text
//! [ legacy bindings ] -> [ SourceIndex ] -> [ Queue ] -> [ Controller ] -> [ native bindings ]
//! ```
//!
//! Mirroring in both directions runs two controllers with their source and
//! destination swapped. Objects are compared by what they grant, so a
//! mirrored object does not cause a write back to its source.
//!
//! [`BindingStore`]: authz_controller_core::BindingStore

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod binding;
mod controller;
mod index;
mod metrics;
mod queue;
mod store;


pub use self::{
    binding::{LegacyBinding, MirrorObject, NativeBinding, TranslateError},
    controller::{Controller, ControllerConfig},
    index::{SharedSourceIndex, SourceIndex},
    metrics::ControllerMetrics,
    queue::{Queue, RequeueBackoff},
    store::{KubeStore, FIELD_MANAGER},
};
