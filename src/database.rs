//! database (db) union structure.
mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;

use crate::AppState;
use crate::parking::{ParkingRepository, PgParkingRepository};
use crate::reservation::{PgReservationRepository, ReservationRepository};
use crate::user::{PgUserRepository, UserRepository};
use crate::vehicle::{PgVehicleRepository, VehicleRepository};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "parkly";
pub const DEFAULT_POOL_SIZE: u32 = 10;

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Errors shared by every repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{field} is already registered")]
    Duplicate { field: &'static str },

    #[error("record not found")]
    NotFound,

    #[error("no place available")]
    Capacity,

    #[error("record was modified concurrently")]
    Stale,

    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Map unique violations to [`RepositoryError::Duplicate`].
    pub fn on_duplicate(err: sqlx::Error, field: &'static str) -> Self {
        let unique = err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());

        if unique {
            Self::Duplicate { field }
        } else {
            Self::Sql(err)
        }
    }
}

/// Repositories handed to handlers.
#[derive(Clone)]
pub struct Database {
    pub users: Arc<dyn UserRepository>,
    pub parkings: Arc<dyn ParkingRepository>,
    pub vehicles: Arc<dyn VehicleRepository>,
    pub reservations: Arc<dyn ReservationRepository>,
}

impl Database {
    /// Init PostgreSQL connections and run migrations.
    pub async fn postgres(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        sqlx::migrate!().run(&postgres).await?;

        Ok(Self {
            users: Arc::new(PgUserRepository::new(postgres.clone())),
            parkings: Arc::new(PgParkingRepository::new(postgres.clone())),
            vehicles: Arc::new(PgVehicleRepository::new(postgres.clone())),
            reservations: Arc::new(PgReservationRepository::new(postgres)),
        })
    }

    /// Keep everything in process memory.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::default());

        Self {
            users: store.clone(),
            parkings: store.clone(),
            vehicles: store.clone(),
            reservations: store,
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
