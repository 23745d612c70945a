use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::database::{RepositoryError, RepositoryResult as Result};
use crate::vehicle::{NewVehicle, Vehicle, VehicleChanges};

const VEHICLE_COLUMNS: &str = "id, owner_id, plate, brand, model, color, created_at";

/// Port for vehicle persistence.
#[async_trait]
pub trait VehicleRepository: Send + Sync {
    /// Insert a vehicle. Fails with [`RepositoryError::Duplicate`] when the
    /// plate is already registered.
    async fn create(&self, vehicle: NewVehicle) -> Result<Vehicle>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Vehicle>>;

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Vehicle>>;

    async fn update(&self, id: i64, changes: &VehicleChanges) -> Result<Vehicle>;

    async fn delete(&self, id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct PgVehicleRepository {
    pool: Pool<Postgres>,
}

impl PgVehicleRepository {
    /// Create a new [`PgVehicleRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VehicleRepository for PgVehicleRepository {
    async fn create(&self, vehicle: NewVehicle) -> Result<Vehicle> {
        let query = format!(
            r#"INSERT INTO vehicles (owner_id, plate, brand, model, color)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {VEHICLE_COLUMNS}"#
        );

        sqlx::query_as::<_, Vehicle>(&query)
            .bind(vehicle.owner_id)
            .bind(vehicle.plate.as_str())
            .bind(&vehicle.brand)
            .bind(&vehicle.model)
            .bind(&vehicle.color)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| RepositoryError::on_duplicate(err, "plate"))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Vehicle>> {
        let query = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = $1");

        Ok(sqlx::query_as::<_, Vehicle>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Vehicle>> {
        let query = format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE owner_id = $1 ORDER BY id"
        );

        Ok(sqlx::query_as::<_, Vehicle>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update(&self, id: i64, changes: &VehicleChanges) -> Result<Vehicle> {
        let query = format!(
            r#"UPDATE vehicles SET
                    plate = COALESCE($2, plate),
                    brand = COALESCE($3, brand),
                    model = COALESCE($4, model),
                    color = COALESCE($5, color)
                WHERE id = $1
                RETURNING {VEHICLE_COLUMNS}"#
        );

        sqlx::query_as::<_, Vehicle>(&query)
            .bind(id)
            .bind(changes.plate.as_ref().map(|plate| plate.as_str()))
            .bind(&changes.brand)
            .bind(&changes.model)
            .bind(&changes.color)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| RepositoryError::on_duplicate(err, "plate"))?
            .ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Confirmed reservations of the vehicle give their place back.
        sqlx::query(
            r#"UPDATE parkings p
                SET available_places = LEAST(p.available_places + r.held, p.total_places)
                FROM (
                    SELECT parking_id, COUNT(*)::INT AS held FROM reservations
                    WHERE vehicle_id = $1 AND status = 'confirmed'
                    GROUP BY parking_id
                ) r
                WHERE p.id = r.parking_id"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(r#"DELETE FROM vehicles WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await?;

        Ok(())
    }
}
