use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::database::{RepositoryError, RepositoryResult as Result};
use crate::parking::{NewParking, Parking, ParkingChanges};

const PARKING_COLUMNS: &str = "id, owner_id, name, address, description, latitude, longitude, \
     total_places, available_places, price_per_hour, created_at";

/// Port for parking lot persistence.
#[async_trait]
pub trait ParkingRepository: Send + Sync {
    async fn create(&self, parking: NewParking) -> Result<Parking>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Parking>>;

    async fn list(&self) -> Result<Vec<Parking>>;

    /// Update a parking lot. Capacity changes shift available places by the
    /// same amount and fail with [`RepositoryError::Capacity`] when places in
    /// use would exceed the new capacity.
    async fn update(&self, id: i64, changes: &ParkingChanges) -> Result<Parking>;

    /// Delete a parking lot and its reservations.
    async fn delete(&self, id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct PgParkingRepository {
    pool: Pool<Postgres>,
}

impl PgParkingRepository {
    /// Create a new [`PgParkingRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParkingRepository for PgParkingRepository {
    async fn create(&self, parking: NewParking) -> Result<Parking> {
        let query = format!(
            r#"INSERT INTO parkings (owner_id, name, address, description, latitude, longitude, total_places, available_places, price_per_hour)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8)
                RETURNING {PARKING_COLUMNS}"#
        );

        Ok(sqlx::query_as::<_, Parking>(&query)
            .bind(parking.owner_id)
            .bind(&parking.name)
            .bind(&parking.address)
            .bind(&parking.description)
            .bind(parking.latitude)
            .bind(parking.longitude)
            .bind(parking.total_places)
            .bind(parking.price_per_hour)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Parking>> {
        let query = format!("SELECT {PARKING_COLUMNS} FROM parkings WHERE id = $1");

        Ok(sqlx::query_as::<_, Parking>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list(&self) -> Result<Vec<Parking>> {
        let query =
            format!("SELECT {PARKING_COLUMNS} FROM parkings ORDER BY created_at DESC");

        Ok(sqlx::query_as::<_, Parking>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update(&self, id: i64, changes: &ParkingChanges) -> Result<Parking> {
        // SET expressions all read the row as it was before the update.
        let query = format!(
            r#"UPDATE parkings SET
                    name = COALESCE($2, name),
                    address = COALESCE($3, address),
                    description = COALESCE($4, description),
                    latitude = COALESCE($5, latitude),
                    longitude = COALESCE($6, longitude),
                    available_places = available_places + (COALESCE($7, total_places) - total_places),
                    total_places = COALESCE($7, total_places),
                    price_per_hour = COALESCE($8, price_per_hour)
                WHERE id = $1
                    AND available_places + (COALESCE($7, total_places) - total_places) >= 0
                RETURNING {PARKING_COLUMNS}"#
        );

        let updated = sqlx::query_as::<_, Parking>(&query)
            .bind(id)
            .bind(&changes.name)
            .bind(&changes.address)
            .bind(&changes.description)
            .bind(changes.latitude)
            .bind(changes.longitude)
            .bind(changes.total_places)
            .bind(changes.price_per_hour)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(parking) => Ok(parking),
            None if self.find_by_id(id).await?.is_some() => {
                Err(RepositoryError::Capacity)
            },
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM parkings WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
