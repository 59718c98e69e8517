use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use classbook_core::repository::{
    AdmissionRule, AdmissionSnapshot, DuplicateScope, EnrollmentStore, EnrollmentTransition,
    TransitionRule, TransitionSnapshot, TrialAdmissionRule, TrialSlotSnapshot, TrialStore,
    TrialTransitionRule,
};
use classbook_core::{
    ConflictReason, ContactInfo, CoreError, CoreResult, Course, CourseCatalog, Enrollment,
    EnrollmentStatus, Identity, Member, MemberDirectory, Page, Paged, TrialBooking,
    TrialBookingFilter, TrialStatus,
};

const ENROLLMENT_COLUMNS: &str =
    "id, member_id, course_id, status, enrolled_at, updated_at";
const TRIAL_COLUMNS: &str = "id, member_id, contact_name, contact_email, contact_phone, course_id, booking_date, start_time, status, booked_at, updated_at";

/// Postgres-backed reservation store.
///
/// Each check-then-write runs in one transaction that first takes
/// `pg_advisory_xact_lock` on the capacity key, so writers on the same key are
/// serialized and every statement after the lock reads committed state.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin_locked(&self, keys: &[String]) -> CoreResult<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        for key in keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }
        debug!(keys = keys.len(), "capacity keys locked");
        Ok(tx)
    }
}

fn enrollment_key(course_id: Uuid) -> String {
    format!("enrollment:{}", course_id)
}

fn slot_key(course_id: Uuid, date: NaiveDate, start_time: NaiveTime) -> String {
    format!("trial:{}:{}:{}", course_id, date, start_time)
}

fn scope_key(scope: &DuplicateScope) -> String {
    match scope {
        DuplicateScope::MemberCourse { member_id, course_id, .. } => {
            format!("trial-member:{}:{}", member_id, course_id)
        }
        DuplicateScope::GuestSlot { contact, course_id, booking_date } => {
            format!("trial-guest:{}:{}:{}", course_id, booking_date, contact.email)
        }
    }
}

/// Lost races surface as `Conflict(ConcurrentUpdate)`; everything else is a fault.
fn map_db_err(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            // serialization_failure, deadlock_detected, unique_violation
            if matches!(code.as_ref(), "40001" | "40P01" | "23505") {
                return CoreError::Conflict(ConflictReason::ConcurrentUpdate);
            }
        }
    }
    CoreError::Fault(err.to_string())
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    name: String,
    day_of_week: i16,
    start_time: NaiveTime,
    duration_minutes: i32,
    max_capacity: i32,
    offers_trial_option: bool,
    max_trial_capacity: Option<i32>,
}

impl TryFrom<CourseRow> for Course {
    type Error = CoreError;

    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        let day_of_week = u8::try_from(row.day_of_week)
            .ok()
            .filter(|d| *d <= 6)
            .ok_or_else(|| CoreError::Fault(format!("course {} has day_of_week {}", row.id, row.day_of_week)))?;
        Ok(Course {
            id: row.id,
            name: row.name,
            day_of_week,
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
            max_capacity: row.max_capacity,
            offers_trial_option: row.offers_trial_option,
            max_trial_capacity: row.max_trial_capacity,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    name: String,
    email: String,
    phone: String,
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: Uuid,
    member_id: Uuid,
    course_id: Uuid,
    status: String,
    enrolled_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = CoreError;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EnrollmentStatus>()
            .map_err(|e| CoreError::Fault(format!("enrollment {}: {}", row.id, e)))?;
        Ok(Enrollment {
            id: row.id,
            member_id: row.member_id,
            course_id: row.course_id,
            status,
            enrolled_at: row.enrolled_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrialRow {
    id: Uuid,
    member_id: Option<Uuid>,
    contact_name: String,
    contact_email: String,
    contact_phone: String,
    course_id: Uuid,
    booking_date: NaiveDate,
    start_time: NaiveTime,
    status: String,
    booked_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<TrialRow> for TrialBooking {
    type Error = CoreError;

    fn try_from(row: TrialRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TrialStatus>()
            .map_err(|e| CoreError::Fault(format!("trial booking {}: {}", row.id, e)))?;
        let contact = ContactInfo::new(row.contact_name, row.contact_email, row.contact_phone);
        let identity = match row.member_id {
            Some(member_id) => Identity::member(member_id),
            None => Identity::guest(contact.clone()),
        };
        Ok(TrialBooking {
            id: row.id,
            identity,
            contact,
            course_id: row.course_id,
            booking_date: row.booking_date,
            start_time: row.start_time,
            status,
            booked_at: row.booked_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Escapes LIKE metacharacters so user input matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn count_registered_in(tx: &mut Transaction<'_, Postgres>, course_id: Uuid) -> CoreResult<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'REGISTERED'",
    )
    .bind(course_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_err)
}

async fn fill_vacancies_in(
    tx: &mut Transaction<'_, Postgres>,
    course_id: Uuid,
    capacity: i32,
    now: NaiveDateTime,
) -> CoreResult<Vec<Enrollment>> {
    let registered = count_registered_in(tx, course_id).await?;
    let vacancies = (i64::from(capacity) - registered).max(0);
    if vacancies == 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
        "UPDATE enrollments SET status = 'REGISTERED', updated_at = $3 \
         WHERE id IN ( \
             SELECT id FROM enrollments \
             WHERE course_id = $1 AND status = 'WAITLISTED' \
             ORDER BY enrolled_at, seq \
             LIMIT $2 \
             FOR UPDATE \
         ) \
         RETURNING {}",
        ENROLLMENT_COLUMNS
    ))
    .bind(course_id)
    .bind(vacancies)
    .bind(now)
    .fetch_all(&mut **tx)
    .await
    .map_err(map_db_err)?;

    let mut promoted: Vec<Enrollment> = convert_all(rows)?;
    promoted.sort_by_key(|e| e.enrolled_at);
    Ok(promoted)
}

#[async_trait]
impl CourseCatalog for PgStore {
    async fn get_course(&self, id: Uuid) -> CoreResult<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, day_of_week, start_time, duration_minutes, max_capacity, \
             offers_trial_option, max_trial_capacity FROM courses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.map(Course::try_from).transpose()
    }
}

#[async_trait]
impl MemberDirectory for PgStore {
    async fn get_member(&self, id: Uuid) -> CoreResult<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, name, email, phone FROM members WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(row.map(|r| Member { id: r.id, name: r.name, email: r.email, phone: r.phone }))
    }
}

#[async_trait]
impl EnrollmentStore for PgStore {
    async fn admit_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
        now: NaiveDateTime,
        rule: AdmissionRule<'_>,
    ) -> CoreResult<Enrollment> {
        let mut tx = self.begin_locked(&[enrollment_key(course_id)]).await?;

        let active = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments \
             WHERE member_id = $1 AND course_id = $2 AND status IN ('REGISTERED', 'WAITLISTED')",
            ENROLLMENT_COLUMNS
        ))
        .bind(member_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?
        .map(Enrollment::try_from)
        .transpose()?;
        let registered = count_registered_in(&mut tx, course_id).await?;

        let status = rule(&AdmissionSnapshot { active, registered })?;
        let enrollment = Enrollment::new(member_id, course_id, status, now);

        sqlx::query(
            "INSERT INTO enrollments (id, member_id, course_id, status, enrolled_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(enrollment.id)
        .bind(enrollment.member_id)
        .bind(enrollment.course_id)
        .bind(enrollment.status.as_str())
        .bind(enrollment.enrolled_at)
        .bind(enrollment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(enrollment)
    }

    async fn transition_enrollment(
        &self,
        id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
        rule: TransitionRule<'_>,
    ) -> CoreResult<EnrollmentTransition> {
        let course_id = sqlx::query_scalar::<_, Uuid>("SELECT course_id FROM enrollments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| CoreError::not_found("enrollment", id))?;

        let mut tx = self.begin_locked(&[enrollment_key(course_id)]).await?;

        let current: Enrollment = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE id = $1 FOR UPDATE",
            ENROLLMENT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?
        .try_into()?;
        let registered = count_registered_in(&mut tx, course_id).await?;
        let previous = current.status;

        let target = rule(&TransitionSnapshot { current: current.clone(), registered })?;

        sqlx::query("UPDATE enrollments SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(target.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        let promoted = if previous == EnrollmentStatus::Registered && target == EnrollmentStatus::Cancelled {
            fill_vacancies_in(&mut tx, course_id, capacity, now).await?
        } else {
            Vec::new()
        };

        tx.commit().await.map_err(map_db_err)?;

        let mut enrollment = current;
        enrollment.update_status(target, now);
        Ok(EnrollmentTransition { enrollment, promoted })
    }

    async fn fill_vacancies(
        &self,
        course_id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
    ) -> CoreResult<Vec<Enrollment>> {
        let mut tx = self.begin_locked(&[enrollment_key(course_id)]).await?;
        let promoted = fill_vacancies_in(&mut tx, course_id, capacity, now).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(promoted)
    }

    async fn get_enrollment(&self, id: Uuid) -> CoreResult<Option<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE id = $1",
            ENROLLMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn find_active_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments \
             WHERE member_id = $1 AND course_id = $2 AND status IN ('REGISTERED', 'WAITLISTED')",
            ENROLLMENT_COLUMNS
        ))
        .bind(member_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn list_enrollments_by_member(&self, member_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE member_id = $1 ORDER BY enrolled_at, seq",
            ENROLLMENT_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn list_enrollments_by_course(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE course_id = $1 ORDER BY enrolled_at, seq",
            ENROLLMENT_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn count_registered(&self, course_id: Uuid) -> CoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'REGISTERED'",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn waitlist(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE course_id = $1 AND status = 'WAITLISTED' \
             ORDER BY enrolled_at, seq",
            ENROLLMENT_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }
}

#[async_trait]
impl TrialStore for PgStore {
    async fn admit_trial(
        &self,
        booking: TrialBooking,
        scope: &DuplicateScope,
        rule: TrialAdmissionRule<'_>,
    ) -> CoreResult<TrialBooking> {
        // Fixed order: enrollment, duplicate scope, slot.
        let mut keys = Vec::with_capacity(3);
        if booking.member_id().is_some() {
            keys.push(enrollment_key(booking.course_id));
        }
        keys.push(scope_key(scope));
        keys.push(slot_key(booking.course_id, booking.booking_date, booking.start_time));
        let mut tx = self.begin_locked(&keys).await?;

        let holds_enrollment = match booking.member_id() {
            Some(member_id) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM enrollments WHERE member_id = $1 AND course_id = $2 \
                 AND status IN ('REGISTERED', 'WAITLISTED'))",
            )
            .bind(member_id)
            .bind(booking.course_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?,
            None => false,
        };

        let duplicates = match scope {
            DuplicateScope::MemberCourse { member_id, course_id, from } => sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM trial_bookings WHERE member_id = $1 AND course_id = $2 \
                 AND booking_date >= $3 AND status = 'BOOKED'",
            )
            .bind(member_id)
            .bind(course_id)
            .bind(from)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?,
            DuplicateScope::GuestSlot { contact, course_id, booking_date } => sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM trial_bookings WHERE contact_name = $1 AND contact_email = $2 \
                 AND contact_phone = $3 AND course_id = $4 AND booking_date = $5 AND status = 'BOOKED'",
            )
            .bind(&contact.name)
            .bind(&contact.email)
            .bind(&contact.phone)
            .bind(course_id)
            .bind(booking_date)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?,
        };

        let booked = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM trial_bookings WHERE course_id = $1 AND booking_date = $2 \
             AND start_time = $3 AND status = 'BOOKED'",
        )
        .bind(booking.course_id)
        .bind(booking.booking_date)
        .bind(booking.start_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        rule(&TrialSlotSnapshot { holds_enrollment, duplicates, booked })?;

        sqlx::query(
            "INSERT INTO trial_bookings (id, member_id, contact_name, contact_email, contact_phone, \
             course_id, booking_date, start_time, status, booked_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(booking.id)
        .bind(booking.member_id())
        .bind(&booking.contact.name)
        .bind(&booking.contact.email)
        .bind(&booking.contact.phone)
        .bind(booking.course_id)
        .bind(booking.booking_date)
        .bind(booking.start_time)
        .bind(booking.status.as_str())
        .bind(booking.booked_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(booking)
    }

    async fn transition_trial(
        &self,
        id: Uuid,
        now: NaiveDateTime,
        rule: TrialTransitionRule<'_>,
    ) -> CoreResult<TrialBooking> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let mut current: TrialBooking = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE id = $1 FOR UPDATE",
            TRIAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| CoreError::not_found("trial booking", id))?
        .try_into()?;

        let target = rule(&current)?;

        sqlx::query("UPDATE trial_bookings SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(target.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;

        current.update_status(target, now);
        Ok(current)
    }

    async fn get_trial(&self, id: Uuid) -> CoreResult<Option<TrialBooking>> {
        sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE id = $1",
            TRIAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .map(TrialBooking::try_from)
        .transpose()
    }

    async fn list_trials_by_member(&self, member_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        let rows = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE member_id = $1 ORDER BY booked_at DESC, id",
            TRIAL_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn list_trials_by_course(&self, course_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        let rows = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE course_id = $1 ORDER BY booked_at DESC, id",
            TRIAL_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn list_trials(
        &self,
        filter: &TrialBookingFilter,
        page: Page,
    ) -> CoreResult<Paged<TrialBooking>> {
        const PREDICATE: &str = "($1::text IS NULL OR status = $1) \
             AND ($2::uuid IS NULL OR course_id = $2) \
             AND ($3::uuid IS NULL OR member_id = $3)";
        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM trial_bookings WHERE {}",
            PREDICATE
        ))
        .bind(status)
        .bind(filter.course_id)
        .bind(filter.member_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;

        let rows = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE {} ORDER BY booked_at DESC, id LIMIT $4 OFFSET $5",
            TRIAL_COLUMNS, PREDICATE
        ))
        .bind(status)
        .bind(filter.course_id)
        .bind(filter.member_id)
        .bind(i64::from(page.size))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(Paged {
            items: convert_all(rows)?,
            total: total.max(0) as u64,
            number: page.number,
            size: page.size,
        })
    }

    async fn search_trials_by_name(&self, query: &str) -> CoreResult<Vec<TrialBooking>> {
        let rows = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings WHERE contact_name ILIKE $1 ESCAPE '\\' \
             ORDER BY booked_at DESC, id",
            TRIAL_COLUMNS
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn count_booked(
        &self,
        course_id: Uuid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM trial_bookings WHERE course_id = $1 AND booking_date = $2 \
             AND start_time = $3 AND status = 'BOOKED'",
        )
        .bind(course_id)
        .bind(booking_date)
        .bind(start_time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn find_overdue_trials(
        &self,
        now: NaiveDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> CoreResult<Vec<TrialBooking>> {
        let rows = sqlx::query_as::<_, TrialRow>(&format!(
            "SELECT {} FROM trial_bookings \
             WHERE status = 'BOOKED' AND booking_date + start_time < $1 \
             AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id LIMIT $3",
            TRIAL_COLUMNS
        ))
        .bind(now)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        convert_all(rows)
    }

    async fn mark_no_show(&self, id: Uuid, now: NaiveDateTime) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE trial_bookings SET status = 'NO_SHOW', updated_at = $2 \
             WHERE id = $1 AND status = 'BOOKED' AND booking_date + start_time < $2",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_trial(id).await? {
            Some(_) => Ok(false),
            None => Err(CoreError::not_found("trial booking", id)),
        }
    }
}
