use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cancelable, TenantAssignable, TenantEntity};
use crate::tenancy::TenantId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tutorial {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub cancel_date: Option<DateTime<Utc>>,
}

/// Client-supplied fields for create and update
#[derive(Debug, Clone, Deserialize)]
pub struct TutorialInput {
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl Tutorial {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant: None,
            title: title.into(),
            description: None,
            published: false,
            canceled: false,
            cancel_date: None,
        }
    }
}

impl From<TutorialInput> for Tutorial {
    fn from(input: TutorialInput) -> Self {
        Self {
            id: None,
            tenant: input.tenant,
            title: input.title,
            description: input.description,
            published: input.published,
            canceled: false,
            cancel_date: None,
        }
    }
}

impl TenantAssignable for Tutorial {
    fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    fn set_tenant(&mut self, tenant: TenantId) {
        self.tenant = Some(tenant);
    }
}

impl Cancelable for Tutorial {
    fn is_canceled(&self) -> bool {
        self.canceled
    }

    fn cancel_date(&self) -> Option<DateTime<Utc>> {
        self.cancel_date
    }

    fn set_cancellation(&mut self, canceled: bool, at: Option<DateTime<Utc>>) {
        self.canceled = canceled;
        self.cancel_date = at;
    }
}

impl TenantEntity for Tutorial {
    const TABLE: &'static str = "tutorials";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        Some(self)
    }
}
