use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::database::{RepositoryError, RepositoryResult as Result};
use crate::reservation::{NewReservation, Reservation, ReservationStatus};

const RESERVATION_COLUMNS: &str = "id, user_id, parking_id, vehicle_id, start_at, end_at, \
     total_price, status, created_at";

/// Port for reservation persistence.
///
/// Implementations keep `parkings.available_places` consistent with the
/// confirmed reservations: taking and releasing a place happens in the same
/// atomic step as the reservation write.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Take a place and insert a confirmed reservation. Fails with
    /// [`RepositoryError::Capacity`] when the parking lot is full.
    async fn create(&self, reservation: NewReservation) -> Result<Reservation>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Reservation>>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>>;

    async fn list_by_parking(&self, parking_id: i64) -> Result<Vec<Reservation>>;

    /// Move a confirmed reservation to a terminal status and give its place
    /// back. Fails with [`RepositoryError::Stale`] when the reservation is no
    /// longer confirmed.
    async fn close(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Reservation>;
}

#[derive(Clone)]
pub struct PgReservationRepository {
    pool: Pool<Postgres>,
}

impl PgReservationRepository {
    /// Create a new [`PgReservationRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn create(&self, reservation: NewReservation) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let taken = sqlx::query(
            r#"UPDATE parkings SET available_places = available_places - 1
                WHERE id = $1 AND available_places > 0"#,
        )
        .bind(reservation.parking_id)
        .execute(&mut *tx)
        .await?;

        if taken.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(RepositoryError::Capacity);
        }

        let query = format!(
            r#"INSERT INTO reservations (user_id, parking_id, vehicle_id, start_at, end_at, total_price, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {RESERVATION_COLUMNS}"#
        );
        let created = sqlx::query_as::<_, Reservation>(&query)
            .bind(reservation.user_id)
            .bind(reservation.parking_id)
            .bind(reservation.vehicle_id)
            .bind(reservation.start_at)
            .bind(reservation.end_at)
            .bind(reservation.total_price)
            .bind(ReservationStatus::Confirmed)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Reservation>> {
        let query =
            format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");

        Ok(sqlx::query_as::<_, Reservation>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE user_id = $1 ORDER BY start_at DESC"
        );

        Ok(sqlx::query_as::<_, Reservation>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_by_parking(&self, parking_id: i64) -> Result<Vec<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE parking_id = $1 ORDER BY start_at DESC"
        );

        Ok(sqlx::query_as::<_, Reservation>(&query)
            .bind(parking_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn close(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"UPDATE reservations SET status = $2
                WHERE id = $1 AND status = $3
                RETURNING {RESERVATION_COLUMNS}"#
        );
        let Some(closed) = sqlx::query_as::<_, Reservation>(&query)
            .bind(id)
            .bind(status)
            .bind(ReservationStatus::Confirmed)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Err(RepositoryError::Stale);
        };

        sqlx::query(
            r#"UPDATE parkings SET available_places = LEAST(available_places + 1, total_places)
                WHERE id = $1"#,
        )
        .bind(closed.parking_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(closed)
    }
}
