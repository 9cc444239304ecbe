use crate::{
    binding::{AnyRole, Binding, RoleRef},
    error::Result,
};
use std::sync::Arc;

/// Read access to one consistent view of roles and bindings.
pub trait BindingLister {
    /// Lists every cluster role binding and, when a namespace is given, the
    /// role bindings in that namespace.
    fn list_bindings(&self, namespace: Option<&str>) -> Result<Vec<Binding>>;

    fn get_role(&self, role_ref: &RoleRef) -> Result<Option<AnyRole>>;
}

impl<L: BindingLister + ?Sized> BindingLister for Arc<L> {
    #[inline]
    fn list_bindings(&self, namespace: Option<&str>) -> Result<Vec<Binding>> {
        (**self).list_bindings(namespace)
    }

    #[inline]
    fn get_role(&self, role_ref: &RoleRef) -> Result<Option<AnyRole>> {
        (**self).get_role(role_ref)
    }
}

impl<L: BindingLister + ?Sized> BindingLister for &L {
    #[inline]
    fn list_bindings(&self, namespace: Option<&str>) -> Result<Vec<Binding>> {
        (**self).list_bindings(namespace)
    }

    #[inline]
    fn get_role(&self, role_ref: &RoleRef) -> Result<Option<AnyRole>> {
        (**self).get_role(role_ref)
    }
}
