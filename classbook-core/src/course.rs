use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::ContactInfo;
use crate::CoreResult;

/// Course facts as published by the catalog. Read-only from this workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
    pub max_capacity: i32,
    pub offers_trial_option: bool,
    pub max_trial_capacity: Option<i32>,
}

impl Course {
    /// Whether `date` is one of this course's weekly occurrences.
    pub fn falls_on(&self, date: NaiveDate) -> bool {
        date.weekday().num_days_from_sunday() == u32::from(self.day_of_week)
    }

    pub fn occurrence(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.start_time)
    }

    /// Configured trial ceiling; `None` when unset or non-positive.
    pub fn trial_capacity(&self) -> Option<i32> {
        self.max_trial_capacity.filter(|cap| *cap > 0)
    }

    pub fn is_full(&self, registered: i64) -> bool {
        registered >= i64::from(self.max_capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl Member {
    pub fn contact(&self) -> ContactInfo {
        ContactInfo::new(self.name.clone(), self.email.clone(), self.phone.clone())
    }
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn get_course(&self, id: Uuid) -> CoreResult<Option<Course>>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn get_member(&self, id: Uuid) -> CoreResult<Option<Member>>;
}
