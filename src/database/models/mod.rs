pub mod tutorial;

pub use tutorial::{Tutorial, TutorialInput};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::tenancy::TenantId;

/// Record that carries an owning tenant
pub trait TenantAssignable: Send {
    fn tenant(&self) -> Option<&TenantId>;
    fn set_tenant(&mut self, tenant: TenantId);
}

/// Record that is soft-deleted instead of removed
pub trait Cancelable {
    fn is_canceled(&self) -> bool;
    fn cancel_date(&self) -> Option<DateTime<Utc>>;
    fn set_cancellation(&mut self, canceled: bool, at: Option<DateTime<Utc>>);

    fn cancel(&mut self, at: DateTime<Utc>) {
        self.set_cancellation(true, Some(at));
    }
}

/// Entity persisted through the tenant repository
pub trait TenantEntity: TenantAssignable + Serialize + DeserializeOwned + Sync + 'static {
    const TABLE: &'static str;

    fn id(&self) -> Option<Uuid>;
    fn set_id(&mut self, id: Uuid);

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        None
    }
}
