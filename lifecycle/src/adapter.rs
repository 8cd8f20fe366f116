use crate::{Result, status::Status};
use kube::{api::DynamicObject, discovery::ApiResource};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Describes what a managed object wants deployed.
///
/// Implemented once per managed kind by the operator author and handed to a
/// [`Reconciler`](crate::Reconciler).
pub trait ManagedObjectAdapter: Send + Sync {
    type Object: kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync;

    /// Whether the object has never been reconciled; only changes event wording
    fn is_creating(&self, obj: &Self::Object) -> Result<bool> {
        Ok(self.status(obj).is_none_or(|s| s.phase.is_empty()))
    }

    /// A fresh, empty managed object
    fn create(&self) -> Self::Object;

    fn status<'a>(&self, obj: &'a Self::Object) -> Option<&'a Status>;

    fn status_mut<'a>(&self, obj: &'a mut Self::Object) -> &'a mut Status;

    /// Every dependent resource the object should have, in apply order.
    ///
    /// Must be a deterministic function of the object spec and the operator configuration.
    fn get_all_resources(&self, obj: &Self::Object) -> Result<Vec<DynamicObject>>;

    /// Kinds the object may own; a superset of what `get_all_resources` can return
    fn get_dependant_resources_list_objects(&self) -> Vec<ApiResource>;
}
